pub mod capture;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod io;
pub mod machine;
pub mod paths;
pub mod sequencer;
pub mod store;

pub use error::{CoreError, Result};
