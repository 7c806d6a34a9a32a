//! # External File Units
//!
//! The heart of the engine: numbered units owning a buffered file frame
//! and the positioning state that makes record semantics work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  registry: process-wide unit map, predefined units,      │
//! │             atexit flush, crash flush                    │
//! ├──────────────────────────────────────────────────────────┤
//! │  ExternalFileUnit                                        │
//! │    lifecycle (this file): open/close, direction,         │
//! │                           async IDs, predicates          │
//! │    record engine (record.rs): begin/finish/advance/      │
//! │                           backspace, endfile, rewind     │
//! │    transfer (transfer.rs): emit/receive, overrun checks  │
//! │    child I/O (child.rs): nested defined-I/O stack        │
//! ├──────────────────────────────────────────────────────────┤
//! │  storage: FileFrame over OpenFile                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Four-Level Positioning
//!
//! A unit tracks its place in the file at four granularities, and the sum
//! of the first two is always the absolute file offset of the current
//! record:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `frame_offset_in_file` | file offset of the buffered frame base |
//! | `record_offset_in_frame` | offset of the current record in the frame |
//! | `position_in_record` | transfer cursor within the record |
//! | `furthest_position_in_record` | high-water mark of the cursor |
//!
//! ## Known / Not Known
//!
//! `record_length`, `endfile_record_number`, `open_recl`, and
//! `left_tab_limit` are semantically "known or not known" and are held as
//! `Option<i64>`; no sentinel values.
//!
//! ## Locking
//!
//! A unit is shared as `Arc<Mutex<ExternalFileUnit>>` and every statement
//! holds the mutex for its full duration. The methods here assume that
//! exclusivity; they take `&mut self` and never lock other units except
//! where noted (reading the default input flushes the default output
//! units first).

mod child;
mod record;
pub mod registry;
mod transfer;

pub use child::ChildIo;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config;
use crate::error::{IoErrorHandler, IoStat};
use crate::storage::FileFrame;
use crate::types::{Access, Action, CloseStatus, Convert, Direction, OpenStatus, Position};

/// Shared handle to a unit; the mutex serializes statements.
pub type UnitRef = Arc<Mutex<ExternalFileUnit>>;

/// A numbered connection between the program and an external file.
#[derive(Debug)]
pub struct ExternalFileUnit {
    unit_number: i32,
    pub access: Access,
    /// Unset until the first transfer or an explicit `FORM=` fixes it.
    pub is_unformatted: Option<bool>,
    direction: Direction,
    /// Fixed record length from `RECL=`; required for direct access.
    pub open_recl: Option<i64>,
    /// Length of the current record, once known.
    pub record_length: Option<i64>,
    endfile_record_number: Option<i64>,
    /// One-based number of the record being read or written.
    pub current_record_number: i64,
    frame_offset_in_file: i64,
    record_offset_in_frame: i64,
    pub position_in_record: i64,
    pub furthest_position_in_record: i64,
    /// Present exactly while a non-advancing transfer is in progress.
    pub left_tab_limit: Option<i64>,
    /// Set while reading without repositioning rights; keeps the frame.
    pub pinned_frame: bool,
    /// The last record of the file ended without a terminator.
    pub unterminated_record: bool,
    implied_endfile: bool,
    began_reading_record: bool,
    swap_endianness: bool,
    direct_access_rec_was_set: bool,
    created_for_internal_child_io: bool,
    async_ids: AsyncIdPool,
    children: Vec<ChildIo>,
    frame: FileFrame,
}

impl ExternalFileUnit {
    pub fn new(unit_number: i32) -> Self {
        Self {
            unit_number,
            access: Access::Sequential,
            is_unformatted: None,
            direction: Direction::Input,
            open_recl: None,
            record_length: None,
            endfile_record_number: None,
            current_record_number: 1,
            frame_offset_in_file: 0,
            record_offset_in_frame: 0,
            position_in_record: 0,
            furthest_position_in_record: 0,
            left_tab_limit: None,
            pinned_frame: false,
            unterminated_record: false,
            implied_endfile: false,
            began_reading_record: false,
            swap_endianness: false,
            direct_access_rec_was_set: false,
            created_for_internal_child_io: false,
            async_ids: AsyncIdPool::default(),
            children: Vec::new(),
            frame: FileFrame::new(),
        }
    }

    pub fn unit_number(&self) -> i32 {
        self.unit_number
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn path(&self) -> Option<&Path> {
        self.frame.file().path()
    }

    pub fn is_connected(&self) -> bool {
        self.frame.file().is_open()
    }

    pub fn swap_endianness(&self) -> bool {
        self.swap_endianness
    }

    pub fn endfile_record_number(&self) -> Option<i64> {
        self.endfile_record_number
    }

    pub fn created_for_internal_child_io(&self) -> bool {
        self.created_for_internal_child_io
    }

    pub fn may_read(&self) -> bool {
        self.frame.file().may_read()
    }

    pub fn may_write(&self) -> bool {
        self.frame.file().may_write()
    }

    pub fn may_position(&self) -> bool {
        self.frame.file().may_position()
    }

    pub fn may_asynchronous(&self) -> bool {
        self.frame.file().may_asynchronous()
    }

    pub fn set_may_asynchronous(&mut self, yes: bool) {
        self.frame.file_mut().set_may_asynchronous(yes);
    }

    pub fn is_terminal(&self) -> bool {
        self.frame.file().is_terminal()
    }

    /// Direct and sequential connections are record files; so are
    /// formatted streams, whose records are newline-delimited. Only an
    /// unformatted stream is a pure byte sink.
    pub fn is_record_file(&self) -> bool {
        self.access != Access::Stream || !self.is_unformatted.unwrap_or(true)
    }

    pub fn is_at_eof(&self) -> bool {
        self.endfile_record_number
            .is_some_and(|n| self.current_record_number >= n)
    }

    /// Direct access is exempt: `ENDFILE` is forbidden there, so its
    /// endfile record number is only a record count, and writing a record
    /// past it legitimately extends the file.
    pub fn is_after_endfile(&self) -> bool {
        self.access != Access::Direct
            && self
                .endfile_record_number
                .is_some_and(|n| self.current_record_number > n)
    }

    /// An input record longer than an explicit sequential `RECL=` is
    /// effectively truncated to it.
    pub fn effective_record_length(&self) -> Option<i64> {
        match (self.open_recl, self.record_length) {
            (Some(recl), Some(length)) if recl < length => Some(recl),
            _ => self.record_length,
        }
    }

    /// Sets the transfer direction after checking it against the
    /// connection's permitted actions.
    pub fn set_direction(&mut self, direction: Direction) -> IoStat {
        match direction {
            Direction::Input => {
                if self.may_read() {
                    self.direction = Direction::Input;
                    IoStat::Ok
                } else {
                    IoStat::ReadFromWriteOnly
                }
            }
            Direction::Output => {
                if self.may_write() {
                    self.direction = Direction::Output;
                    IoStat::Ok
                } else {
                    IoStat::WriteToReadOnly
                }
            }
        }
    }

    /// Connects the unit to a file.
    ///
    /// Returns true when the unit was already connected to a different
    /// file and an implied close was performed first. Re-opening the same
    /// file (or giving no file) with `STATUS=` unset or `'OLD'` keeps the
    /// existing connection.
    pub fn open_unit(
        &mut self,
        status: Option<OpenStatus>,
        action: Option<Action>,
        position: Position,
        new_path: Option<PathBuf>,
        convert: Convert,
        handler: &mut IoErrorHandler,
    ) -> bool {
        let convert = if convert == Convert::Unknown {
            config::default_conversion()
        } else {
            convert
        };
        self.swap_endianness = convert.should_swap();
        let mut implied_close = false;
        if self.is_connected() {
            let is_same_path = matches!(
                (&new_path, self.path()),
                (Some(new), Some(old)) if new.as_path() == old
            );
            if status.is_some_and(|s| s != OpenStatus::Old) && is_same_path {
                handler.signal_error(
                    IoStat::GenericError,
                    "OPEN statement for connected unit may not have explicit STATUS= other than 'OLD'",
                );
                return implied_close;
            }
            if new_path.is_none() || is_same_path {
                return implied_close;
            }
            // OPEN with a new FILE= on a connected unit implies CLOSE
            self.do_implied_endfile(handler);
            self.flush_output(handler);
            self.frame.truncate_frame(0);
            if let Some(old) = self.path().map(Path::to_path_buf) {
                registry::unbind_path(&old);
            }
            self.frame.file_mut().close(CloseStatus::Keep, handler);
            implied_close = true;
        }
        if let Some(path) = &new_path {
            if let Some(holder) = registry::path_holder(path) {
                handler.signal_error(
                    IoStat::OpenAlreadyConnected,
                    format!(
                        "OPEN(UNIT={},FILE='{}'): file is already connected to unit {}",
                        self.unit_number,
                        path.display(),
                        holder
                    ),
                );
                return implied_close;
            }
        }
        if let Some(path) = new_path {
            self.frame.file_mut().set_path(path);
        }
        self.frame
            .file_mut()
            .open(status.unwrap_or(OpenStatus::Unknown), action, position, handler);
        if self.is_connected() {
            if let Some(path) = self.path().map(Path::to_path_buf) {
                registry::bind_path(path, self.unit_number);
            }
        }
        let total_bytes = self.frame.file().known_size();
        if self.access == Access::Direct {
            match self.open_recl {
                None => handler.signal_error(
                    IoStat::OpenBadRecl,
                    format!(
                        "OPEN(UNIT={},ACCESS='DIRECT'): record length is not known",
                        self.unit_number
                    ),
                ),
                Some(recl) if recl <= 0 => handler.signal_error(
                    IoStat::OpenBadRecl,
                    format!(
                        "OPEN(UNIT={},ACCESS='DIRECT',RECL={}): record length is invalid",
                        self.unit_number, recl
                    ),
                ),
                Some(recl) => {
                    if let Some(total) = total_bytes {
                        if total % recl != 0 {
                            handler.signal_error(
                                IoStat::OpenBadRecl,
                                format!(
                                    "OPEN(UNIT={},ACCESS='DIRECT',RECL={}): record length is not an even divisor of the file size {}",
                                    self.unit_number, recl, total
                                ),
                            );
                        }
                    }
                }
            }
            self.record_length = self.open_recl;
        }
        self.endfile_record_number = None;
        self.current_record_number = 1;
        if let (Some(total), Some(recl)) = (total_bytes, self.open_recl) {
            if self.access == Access::Direct && recl > 0 {
                self.endfile_record_number = Some(1 + total / recl);
            }
        }
        self.frame_offset_in_file = 0;
        self.record_offset_in_frame = 0;
        self.begin_record();
        if position == Position::Append {
            if let Some(total) = total_bytes {
                self.frame_offset_in_file = total;
            }
            if self.access != Access::Stream {
                if self.endfile_record_number.is_none() {
                    // Unknown record count; fake an endfile far enough out
                    // that BACKSPACE can still count back from it.
                    self.endfile_record_number = Some(i64::MAX - 2);
                }
                self.current_record_number = self.endfile_record_number.unwrap_or(1);
            }
        }
        debug!(
            unit = self.unit_number,
            access = ?self.access,
            swap = self.swap_endianness,
            "unit connected"
        );
        implied_close
    }

    /// Connects an unconnected unit to its default local file `fort.N`.
    pub fn open_anonymous_unit(
        &mut self,
        status: Option<OpenStatus>,
        action: Option<Action>,
        position: Position,
        convert: Convert,
        handler: &mut IoErrorHandler,
    ) {
        let path = PathBuf::from(format!("fort.{}", self.unit_number));
        self.open_unit(status, action, position, Some(path), convert, handler);
    }

    /// Disconnects the unit, completing any pending endfile first.
    pub fn close_unit(&mut self, status: CloseStatus, handler: &mut IoErrorHandler) {
        self.do_implied_endfile(handler);
        self.flush_output(handler);
        if let Some(path) = self.path().map(Path::to_path_buf) {
            registry::unbind_path(&path);
        }
        self.frame.file_mut().close(status, handler);
    }

    /// Allocates the least free asynchronous operation ID.
    pub fn get_asynchronous_id(&mut self, handler: &mut IoErrorHandler) -> Option<i32> {
        if !self.may_asynchronous() {
            handler.signal_error(
                IoStat::BadAsynchronous,
                format!("asynchronous I/O is not allowed on unit {}", self.unit_number),
            );
            None
        } else if let Some(id) = self.async_ids.acquire_least() {
            Some(id)
        } else {
            handler.signal_error(
                IoStat::TooManyAsyncOps,
                format!(
                    "too many pending asynchronous operations on unit {}",
                    self.unit_number
                ),
            );
            None
        }
    }

    /// Completes the asynchronous operation `id`; `0` completes all of
    /// them. Returns false for IDs that are unknown or already complete.
    pub fn wait(&mut self, id: i32) -> bool {
        self.async_ids.release(id)
    }

    pub(crate) fn frame(&self) -> &FileFrame {
        &self.frame
    }

    pub(crate) fn frame_mut(&mut self) -> &mut FileFrame {
        &mut self.frame
    }

    fn predefine(&mut self, fd: i32) {
        self.frame.file_mut().predefine(fd);
    }

    /// Resets the intra-record cursors for a fresh record. The record
    /// length stays pinned to `RECL=` on direct access and becomes
    /// unknown otherwise.
    pub(crate) fn begin_record(&mut self) {
        self.position_in_record = 0;
        self.furthest_position_in_record = 0;
        self.unterminated_record = false;
        self.record_length = if self.access == Access::Direct {
            self.open_recl
        } else {
            None
        };
    }
}

/// Fixed-width pool of asynchronous operation IDs. Bit set = free.
/// ID 0 is reserved: passed to `wait` it means "all IDs".
#[derive(Debug, Clone)]
struct AsyncIdPool {
    available: u64,
}

impl Default for AsyncIdPool {
    fn default() -> Self {
        Self { available: !1 }
    }
}

impl AsyncIdPool {
    const CAPACITY: i32 = u64::BITS as i32;

    fn acquire_least(&mut self) -> Option<i32> {
        if self.available == 0 {
            None
        } else {
            let id = self.available.trailing_zeros() as i32;
            self.available &= !(1u64 << id);
            Some(id)
        }
    }

    fn release(&mut self, id: i32) -> bool {
        if id < 0 || id >= Self::CAPACITY || self.available & (1u64 << id) != 0 {
            return false;
        }
        if id == 0 {
            self.available = !1;
        } else {
            self.available |= 1u64 << id;
        }
        true
    }
}
