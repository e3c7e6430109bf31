//! replscale-core — shared types, size table and configuration.
//!
//! Everything in this crate is pure: no I/O beyond reading the config
//! file and the size table from disk. The orchestrator and the store
//! build on these types.

pub mod config;
pub mod error;
pub mod selector;
pub mod size_table;
pub mod types;

pub use config::ScalerConfig;
pub use error::{CoreError, CoreResult};
pub use selector::{NextClass, select_next_class};
pub use size_table::SizeTable;
pub use types::*;
