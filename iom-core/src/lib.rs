//! iom-core: Pure data-plane library for the avionics I/O manager.
//!
//! No I/O, no OS calls — just algorithms. This crate is the shared core used
//! by `iom-partition` (the ARINC-653 partition task) and `iom-sim` (the
//! simulator binary): configuration views, CRC and freshness-counter checks,
//! confirmation state machines, validity conditions, the input/output signal
//! conversion matrix, and the source-selection engine.

pub mod bytes;
pub mod config;
pub mod confirm;
pub mod convert_in;
pub mod convert_out;
pub mod crc;
pub mod select;
pub mod types;
pub mod validity;

// Re-export commonly used types at crate root
pub use bytes::Endianness;
pub use config::{Config, DisplayUnit};
pub use confirm::ConfirmObject;
pub use types::*;
