//! Persistence seam for scan sessions.
//!
//! The sequencer only needs [`ScanStore`]. [`RedbStore`] is the on-disk
//! implementation; it also carries the read/write helpers the CLI uses.

mod db;

pub use db::RedbStore;

use crate::device::{BladeRecord, DeviceConfig, DiskTypeParams};
use crate::error::Result;

pub trait ScanStore: Send + Sync {
    /// Create a scan record for `disk_type_id` and return its id.
    fn create_scan_session(&self, disk_type_id: u64) -> Result<u64>;

    fn get_disk_type_params(&self, disk_type_id: u64) -> Result<Option<DiskTypeParams>>;

    /// `None` when the rig has never been calibrated.
    fn get_device_config(&self) -> Result<Option<DeviceConfig>>;

    /// Store one blade's audio. The returned record has its id assigned.
    fn save_blade_record(&self, scan_id: u64, seq: u32, audio: &[u8]) -> Result<BladeRecord>;
}
