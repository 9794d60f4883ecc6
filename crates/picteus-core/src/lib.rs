//! Low-level utilities shared across Picteus crates.
//!
//! Holds the wall-clock helper used for notification timestamps,
//! poison-tolerant mutex access, and the atomic JSON store used for
//! persisted extension settings.

pub mod atomic_io;
pub mod sync_utils;
pub mod time_utils;

pub use atomic_io::{read_json_file, write_json_atomic};
pub use sync_utils::lock_or_recover;
pub use time_utils::current_unix_timestamp_ms;
