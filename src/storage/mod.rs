//! # Storage Layer
//!
//! The two-level file abstraction the unit engine drives:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      ExternalFileUnit (units)       │
//! ├─────────────────────────────────────┤
//! │  FileFrame: buffered byte window    │
//! │  read_frame / write_frame / flush   │
//! ├─────────────────────────────────────┤
//! │  OpenFile: raw positional I/O       │
//! │  open / read_at / write_at / close  │
//! └─────────────────────────────────────┘
//! ```
//!
//! [`OpenFile`] owns the descriptor and the open/close disposition
//! semantics (`OLD`/`NEW`/`UNKNOWN`/`REPLACE`/`SCRATCH`, `KEEP`/`DELETE`),
//! including the dup'ed descriptors behind the predefined units. It seeks
//! when the file is positionable and falls back to sequential motion for
//! terminals and pipes.
//!
//! [`FileFrame`] is the buffered window the record engine reads and
//! writes through. Its base can be realigned to any file offset; reads
//! are chunked, writes accumulate in a dirty prefix that is written back
//! on flush. The record engine never touches the descriptor directly.
//!
//! Unlike a page store, the frame is not memory-mapped: units are
//! routinely connected to terminals and pipes, and `BACKSPACE` needs a
//! window that can slide backward over a file that is being appended to,
//! so the frame is an ordinary read/seek buffer.

mod file;
mod frame;

pub use file::OpenFile;
pub use frame::{FileFrame, MIN_READ_CHUNK};
