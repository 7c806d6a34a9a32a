//! # recio - Record-Oriented External File Units
//!
//! recio is the external file unit engine of a record-oriented I/O
//! runtime: numbered units (with the classical predefined trio 0/5/6 and
//! `fort.N` anonymous files) connected to files, terminals, and pipes,
//! carrying strict record structure over a buffered byte frame.
//!
//! ## Quick Start
//!
//! ```ignore
//! use recio::{registry, Direction, IoErrorHandler};
//!
//! let unit = registry::lookup_or_create_anonymous(7, Direction::Output, Some(false));
//! let mut handler = IoErrorHandler::new();
//! let mut unit = unit.lock();
//! unit.set_direction(Direction::Output);
//! unit.emit(b"Hi", 1, &mut handler);
//! unit.advance_record(&mut handler);
//! unit.close_unit(recio::CloseStatus::Keep, &mut handler);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Statement drivers (callers)           │
//! ├─────────────────────────────────────────┤
//! │   units::registry                       │
//! │   process-wide map, predefined units,   │
//! │   atexit flush, crash flush             │
//! ├─────────────────────────────────────────┤
//! │   units::ExternalFileUnit               │
//! │   record engine · transfer · child I/O  │
//! ├─────────────────────────────────────────┤
//! │   storage::FileFrame                    │
//! │   buffered window, dirty tracking       │
//! ├─────────────────────────────────────────┤
//! │   storage::OpenFile                     │
//! │   open dispositions, positional I/O     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Record Formats
//!
//! | Access | Formatted | On disk |
//! |--------|-----------|---------|
//! | Direct | either | exactly `RECL=` bytes, padded |
//! | Sequential | no | 4-byte length marker + payload + marker |
//! | Sequential | yes | payload + `\n` (optional `\r` stripped) |
//! | Stream | yes | payload + `\n`, byte-addressable |
//! | Stream | no | raw bytes, no structure |
//!
//! ## Error Model
//!
//! No operation returns `Result`: faults land on an [`IoErrorHandler`]
//! carried by the statement, with the first signaled code winning, and
//! transfer operations report failure through their `bool` return.
//! Invariant violations panic. See [`error`].
//!
//! ## Module Overview
//!
//! - [`units`]: the unit engine and the process-wide [`units::registry`]
//! - [`storage`]: the buffered frame over raw positional file access
//! - [`encoding`]: endian swap, record markers, newline search
//! - [`error`]: status codes and the per-statement handler
//! - [`types`]: access/action/status/position/convert enums
//! - [`config`]: process-wide conversion default

pub mod config;
pub mod encoding;
pub mod error;
pub mod storage;
pub mod types;
pub mod units;

pub use error::{IoErrorHandler, IoStat};
pub use types::{Access, Action, CloseStatus, Convert, Direction, OpenStatus, Position};
pub use units::{registry, ChildIo, ExternalFileUnit, UnitRef};
