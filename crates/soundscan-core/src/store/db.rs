//! redb-backed [`ScanStore`].
//!
//! # Table design
//!
//! Records are JSON-encoded under `u64` keys allocated as last key + 1, so
//! iteration order is creation order. Blade audio lives in its own table
//! under the blade's id to keep metadata scans cheap.
//!
//! ```text
//! disk_types     u64  -> DiskType
//! scans          u64  -> DiskScan
//! blades         u64  -> BladeRecord
//! blade_audio    u64  -> WAV bytes
//! device_config  str  -> DeviceConfig   (single "current" row)
//! ```

use std::fmt::Display;
use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::device::{BladeRecord, DeviceConfig, DiskScan, DiskType, DiskTypeParams};
use crate::error::{CoreError, Result};

use super::ScanStore;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: record id. Value: JSON-encoded record (raw bytes for audio).
type IdTable = TableDefinition<'static, u64, &'static [u8]>;

const DISK_TYPES: IdTable = TableDefinition::new("disk_types");
const SCANS: IdTable = TableDefinition::new("scans");
const BLADES: IdTable = TableDefinition::new("blades");
const BLADE_AUDIO: IdTable = TableDefinition::new("blade_audio");
const DEVICE_CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("device_config");

const CURRENT: &str = "current";

fn db_err(e: impl Display) -> CoreError {
    CoreError::Store(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(db_err)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(db_err)
}

fn next_id(table: &impl ReadableTable<u64, &'static [u8]>) -> Result<u64> {
    let last = table.last().map_err(db_err)?;
    Ok(last.map(|(key, _)| key.value() + 1).unwrap_or(1))
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(DISK_TYPES).map_err(db_err)?;
        wt.open_table(SCANS).map_err(db_err)?;
        wt.open_table(BLADES).map_err(db_err)?;
        wt.open_table(BLADE_AUDIO).map_err(db_err)?;
        wt.open_table(DEVICE_CONFIG).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn get<T: DeserializeOwned>(&self, def: IdTable, id: u64) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(def).map_err(db_err)?;
        let found = table.get(id).map_err(db_err)?;
        found.map(|guard| decode(guard.value())).transpose()
    }

    fn list<T: DeserializeOwned>(&self, def: IdTable) -> Result<Vec<T>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(def).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, value) = entry.map_err(db_err)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Disk types
    // -----------------------------------------------------------------------

    pub fn put_disk_type(
        &self,
        name: &str,
        diameter: f64,
        blade_distance: i64,
        blade_force: i64,
    ) -> Result<DiskType> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("disk type name is empty".into()));
        }
        let wt = self.db.begin_write().map_err(db_err)?;
        let disk_type = {
            let mut table = wt.open_table(DISK_TYPES).map_err(db_err)?;
            let disk_type = DiskType {
                id: next_id(&table)?,
                name: name.to_string(),
                diameter,
                blade_distance,
                blade_force,
                created_at: Utc::now(),
            };
            table
                .insert(disk_type.id, encode(&disk_type)?.as_slice())
                .map_err(db_err)?;
            disk_type
        };
        wt.commit().map_err(db_err)?;
        Ok(disk_type)
    }

    pub fn get_disk_type(&self, id: u64) -> Result<Option<DiskType>> {
        self.get(DISK_TYPES, id)
    }

    pub fn list_disk_types(&self) -> Result<Vec<DiskType>> {
        self.list(DISK_TYPES)
    }

    // -----------------------------------------------------------------------
    // Device config
    // -----------------------------------------------------------------------

    pub fn put_device_config(&self, config: &DeviceConfig) -> Result<()> {
        let value = encode(config)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(DEVICE_CONFIG).map_err(db_err)?;
            table.insert(CURRENT, value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scans and blades
    // -----------------------------------------------------------------------

    pub fn get_scan(&self, id: u64) -> Result<Option<DiskScan>> {
        self.get(SCANS, id)
    }

    pub fn list_scans(&self) -> Result<Vec<DiskScan>> {
        self.list(SCANS)
    }

    pub fn blades_for_scan(&self, scan_id: u64) -> Result<Vec<BladeRecord>> {
        if self.get_scan(scan_id)?.is_none() {
            return Err(CoreError::ScanNotFound(scan_id));
        }
        let mut blades: Vec<BladeRecord> = self.list(BLADES)?;
        blades.retain(|b| b.scan_id == scan_id);
        blades.sort_by_key(|b| b.seq);
        Ok(blades)
    }

    pub fn get_blade(&self, id: u64) -> Result<BladeRecord> {
        self.get(BLADES, id)?.ok_or(CoreError::BladeNotFound(id))
    }

    pub fn blade_audio(&self, id: u64) -> Result<Vec<u8>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(BLADE_AUDIO).map_err(db_err)?;
        let guard = table
            .get(id)
            .map_err(db_err)?
            .ok_or(CoreError::BladeNotFound(id))?;
        Ok(guard.value().to_vec())
    }
}

impl ScanStore for RedbStore {
    fn create_scan_session(&self, disk_type_id: u64) -> Result<u64> {
        if self.get_disk_type(disk_type_id)?.is_none() {
            return Err(CoreError::DiskTypeNotFound(disk_type_id));
        }
        let wt = self.db.begin_write().map_err(db_err)?;
        let id = {
            let mut table = wt.open_table(SCANS).map_err(db_err)?;
            let now = Utc::now();
            let scan = DiskScan {
                id: next_id(&table)?,
                name: DiskScan::default_name(now),
                disk_type_id,
                is_training: false,
                created_at: now,
            };
            table
                .insert(scan.id, encode(&scan)?.as_slice())
                .map_err(db_err)?;
            scan.id
        };
        wt.commit().map_err(db_err)?;
        Ok(id)
    }

    fn get_disk_type_params(&self, disk_type_id: u64) -> Result<Option<DiskTypeParams>> {
        Ok(self.get_disk_type(disk_type_id)?.map(|d| d.params()))
    }

    fn get_device_config(&self) -> Result<Option<DeviceConfig>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DEVICE_CONFIG).map_err(db_err)?;
        let found = table.get(CURRENT).map_err(db_err)?;
        found.map(|guard| decode(guard.value())).transpose()
    }

    fn save_blade_record(&self, scan_id: u64, seq: u32, audio: &[u8]) -> Result<BladeRecord> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let record = {
            let scans = wt.open_table(SCANS).map_err(db_err)?;
            if scans.get(scan_id).map_err(db_err)?.is_none() {
                return Err(CoreError::ScanNotFound(scan_id));
            }
            let mut blades = wt.open_table(BLADES).map_err(db_err)?;
            let record = BladeRecord {
                id: next_id(&blades)?,
                scan_id,
                seq,
                prediction: None,
                audio_len: audio.len(),
                created_at: Utc::now(),
            };
            blades
                .insert(record.id, encode(&record)?.as_slice())
                .map_err(db_err)?;
            let mut audio_table = wt.open_table(BLADE_AUDIO).map_err(db_err)?;
            audio_table.insert(record.id, audio).map_err(db_err)?;
            record
        };
        // Blade row and audio commit together or not at all.
        wt.commit().map_err(db_err)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("nested/scans.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn ids_are_sequential() {
        let (_dir, store) = open_temp();
        let a = store.put_disk_type("HPT stage 1", 500.0, 12, 40).unwrap();
        let b = store.put_disk_type("HPT stage 2", 480.0, 10, 35).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        let names: Vec<_> = store
            .list_disk_types()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["HPT stage 1", "HPT stage 2"]);
    }

    #[test]
    fn empty_name_is_rejected() {
        let (_dir, store) = open_temp();
        assert!(matches!(
            store.put_disk_type("  ", 1.0, 1, 1),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn disk_type_params_round_trip() {
        let (_dir, store) = open_temp();
        let d = store.put_disk_type("fan", 900.0, 25, 60).unwrap();
        assert_eq!(
            store.get_disk_type_params(d.id).unwrap(),
            Some(DiskTypeParams {
                blade_force: 60,
                blade_distance: 25,
            })
        );
        assert_eq!(store.get_disk_type_params(99).unwrap(), None);
    }

    #[test]
    fn scan_requires_known_disk_type() {
        let (_dir, store) = open_temp();
        assert!(matches!(
            store.create_scan_session(7),
            Err(CoreError::DiskTypeNotFound(7))
        ));
        assert!(store.list_scans().unwrap().is_empty());
    }

    #[test]
    fn scan_gets_default_name() {
        let (_dir, store) = open_temp();
        let d = store.put_disk_type("fan", 900.0, 25, 60).unwrap();
        let id = store.create_scan_session(d.id).unwrap();
        let scan = store.get_scan(id).unwrap().unwrap();
        assert!(scan.name.ends_with(" New disc_scan"));
        assert_eq!(scan.disk_type_id, d.id);
        assert!(!scan.is_training);
    }

    #[test]
    fn device_config_absent_until_saved() {
        let (_dir, store) = open_temp();
        assert_eq!(store.get_device_config().unwrap(), None);

        let cfg = DeviceConfig {
            recording_time_ms: 1200,
            ..Default::default()
        };
        store.put_device_config(&cfg).unwrap();
        assert_eq!(store.get_device_config().unwrap(), Some(cfg));
    }

    #[test]
    fn blades_keep_audio_and_order() {
        let (_dir, store) = open_temp();
        let d = store.put_disk_type("fan", 900.0, 25, 60).unwrap();
        let scan = store.create_scan_session(d.id).unwrap();
        let other = store.create_scan_session(d.id).unwrap();

        let second = store.save_blade_record(scan, 2, b"two").unwrap();
        store.save_blade_record(other, 1, b"elsewhere").unwrap();
        let first = store.save_blade_record(scan, 1, b"one").unwrap();

        let seqs: Vec<_> = store
            .blades_for_scan(scan)
            .unwrap()
            .iter()
            .map(|b| b.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(store.blade_audio(first.id).unwrap(), b"one");
        assert_eq!(store.get_blade(second.id).unwrap().audio_len, 3);
        assert_eq!(store.get_blade(second.id).unwrap().prediction, None);
    }

    #[test]
    fn blade_for_unknown_scan_is_rejected() {
        let (_dir, store) = open_temp();
        assert!(matches!(
            store.save_blade_record(3, 1, b"x"),
            Err(CoreError::ScanNotFound(3))
        ));
        assert!(matches!(store.get_blade(1), Err(CoreError::BladeNotFound(1))));
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scans.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.put_disk_type("fan", 900.0, 25, 60).unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.list_disk_types().unwrap().len(), 1);
        assert_eq!(store.put_disk_type("hpc", 1.0, 1, 1).unwrap().id, 2);
    }
}
