//! # Raw File Access
//!
//! `OpenFile` wraps a `std::fs::File` with the open-status and
//! close-status semantics of the unit engine, a logical byte position,
//! and the capability flags the record engine dispatches on.
//!
//! ## Positionable vs. Sequential
//!
//! A regular file is *positionable*: `read_at`/`write_at` seek to the
//! requested offset before transferring. Terminals, pipes, and the
//! predefined descriptors are not; for those the requested offset must
//! match the logical position the file has already reached, and the
//! transfer proceeds sequentially. The frame layer only ever moves
//! forward on such files.
//!
//! ## Predefined Descriptors
//!
//! `predefine` binds an inherited descriptor (0, 1, or 2) by `dup`ing it,
//! so closing the unit never closes the process's real standard streams.
//!
//! ## Scratch Files
//!
//! `STATUS='SCRATCH'` connections use `tempfile::tempfile()`: the file is
//! unlinked at creation, so it disappears on close regardless of the
//! close disposition.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IoErrorHandler, IoStat};
use crate::types::{Action, CloseStatus, OpenStatus, Position};

#[derive(Debug, Default)]
pub struct OpenFile {
    file: Option<File>,
    path: Option<PathBuf>,
    position: i64,
    known_size: Option<i64>,
    may_read: bool,
    may_write: bool,
    may_position: bool,
    may_asynchronous: bool,
    is_terminal: bool,
    is_scratch: bool,
}

impl OpenFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    pub fn take_path(&mut self) -> Option<PathBuf> {
        self.path.take()
    }

    pub fn known_size(&self) -> Option<i64> {
        self.known_size
    }

    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    pub fn may_read(&self) -> bool {
        self.may_read
    }

    pub fn may_write(&self) -> bool {
        self.may_write
    }

    pub fn may_position(&self) -> bool {
        self.may_position
    }

    pub fn may_asynchronous(&self) -> bool {
        self.may_asynchronous
    }

    pub fn set_may_asynchronous(&mut self, yes: bool) {
        self.may_asynchronous = yes;
    }

    /// Whether the descriptor does CRLF translation. Text-mode streams are
    /// a Windows CRT concept; this implementation always does binary I/O.
    pub fn is_windows_text_file(&self) -> bool {
        false
    }

    /// Opens the installed path with the given dispositions.
    ///
    /// With no explicit action, tries read-write first and degrades to
    /// read-only, then write-only. Failures are reported on the handler
    /// and leave the file unopened.
    pub fn open(
        &mut self,
        status: OpenStatus,
        action: Option<Action>,
        initial_position: Position,
        handler: &mut IoErrorHandler,
    ) {
        if status == OpenStatus::Scratch {
            if self.path.is_some() {
                handler.signal_error(
                    IoStat::GenericError,
                    "FILE= may not appear with STATUS='SCRATCH'",
                );
                self.path = None;
            }
            match tempfile::tempfile() {
                Ok(file) => {
                    self.install(file, Action::ReadWrite);
                    self.is_scratch = true;
                    debug!("opened scratch file");
                }
                Err(err) => handler.signal_os_error("failed to create scratch file", &err),
            }
            return;
        }
        let Some(path) = self.path.clone() else {
            handler.signal_error(
                IoStat::GenericError,
                "OPEN requires FILE= when STATUS= is not 'SCRATCH'",
            );
            return;
        };
        let attempts: &[Action] = match action {
            Some(Action::Read) => &[Action::Read],
            Some(Action::Write) => &[Action::Write],
            Some(Action::ReadWrite) => &[Action::ReadWrite],
            None => &[Action::ReadWrite, Action::Read, Action::Write],
        };
        for (index, try_action) in attempts.iter().enumerate() {
            let readable = matches!(try_action, Action::Read | Action::ReadWrite);
            let writable = matches!(try_action, Action::Write | Action::ReadWrite);
            let mut options = OpenOptions::new();
            options.read(readable).write(writable);
            match status {
                OpenStatus::New => {
                    options.write(true).create_new(true);
                }
                OpenStatus::Replace if writable => {
                    options.create(true).truncate(true);
                }
                OpenStatus::Unknown if writable => {
                    options.create(true);
                }
                _ => {}
            }
            match options.open(&path) {
                Ok(file) => {
                    self.install(file, *try_action);
                    debug!(path = %path.display(), ?status, "opened unit file");
                    break;
                }
                Err(err) => {
                    if index + 1 == attempts.len() {
                        handler.signal_os_error(
                            &format!("failed to open '{}'", path.display()),
                            &err,
                        );
                    }
                }
            }
        }
        if self.may_position && initial_position == Position::Append {
            self.position = self.known_size.unwrap_or(0);
        }
    }

    fn install(&mut self, file: File, action: Action) {
        let fd = file.as_raw_fd();
        self.is_terminal = unsafe { libc::isatty(fd) } == 1;
        let metadata = file.metadata().ok();
        let is_regular = metadata.as_ref().map(|m| m.is_file()).unwrap_or(false);
        self.known_size = if is_regular {
            metadata.map(|m| m.len() as i64)
        } else {
            None
        };
        self.may_position = is_regular;
        self.may_read = matches!(action, Action::Read | Action::ReadWrite);
        self.may_write = matches!(action, Action::Write | Action::ReadWrite);
        self.position = 0;
        self.file = Some(file);
    }

    /// Binds an inherited standard descriptor for a predefined unit.
    pub fn predefine(&mut self, fd: RawFd) {
        // SAFETY: dup gives this OpenFile its own descriptor, so dropping
        // the File never closes the process's real standard stream.
        let duped = unsafe { libc::dup(fd) };
        if duped >= 0 {
            self.file = Some(unsafe { File::from_raw_fd(duped) });
        }
        self.path = None;
        self.position = 0;
        self.known_size = None;
        self.may_read = fd == 0;
        self.may_write = fd != 0;
        self.may_position = false;
        self.is_terminal = unsafe { libc::isatty(fd) } == 1;
        self.is_scratch = false;
    }

    /// Reads up to `buf.len()` bytes at file offset `at`. Returns the
    /// byte count actually read, which is short only at end of file or
    /// after a fault was signaled.
    pub fn read_at(&mut self, at: i64, buf: &mut [u8], handler: &mut IoErrorHandler) -> usize {
        let Some(file) = self.file.as_mut() else {
            handler.signal_error(
                IoStat::GenericError,
                "attempted to read from an unconnected unit",
            );
            return 0;
        };
        if self.position != at {
            if !self.may_position {
                handler.signal_error(
                    IoStat::GenericError,
                    format!("attempted to reposition a non-positionable file to offset {}", at),
                );
                return 0;
            }
            if let Err(err) = file.seek(SeekFrom::Start(at as u64)) {
                handler.signal_os_error("seek failed", &err);
                return 0;
            }
            self.position = at;
        }
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    self.position += n as i64;
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    handler.signal_os_error("read failed", &err);
                    break;
                }
            }
        }
        total
    }

    /// Writes all of `buf` at file offset `at`. Returns the byte count
    /// actually written; short only after a fault was signaled.
    pub fn write_at(&mut self, at: i64, buf: &[u8], handler: &mut IoErrorHandler) -> usize {
        let Some(file) = self.file.as_mut() else {
            handler.signal_error(
                IoStat::GenericError,
                "attempted to write to an unconnected unit",
            );
            return 0;
        };
        if self.position != at && self.may_position {
            if let Err(err) = file.seek(SeekFrom::Start(at as u64)) {
                handler.signal_os_error("seek failed", &err);
                return 0;
            }
            self.position = at;
        }
        let mut total = 0;
        while total < buf.len() {
            match file.write(&buf[total..]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    self.position += n as i64;
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    handler.signal_os_error("write failed", &err);
                    break;
                }
            }
        }
        if total > 0 {
            if let Some(size) = self.known_size {
                self.known_size = Some(size.max(at + total as i64));
            }
        }
        total
    }

    /// Shrinks or extends the file to `at` bytes. A no-op on files that
    /// cannot be positioned.
    pub fn truncate(&mut self, at: i64, handler: &mut IoErrorHandler) {
        if !self.may_position {
            return;
        }
        if let Some(file) = self.file.as_mut() {
            match file.set_len(at as u64) {
                Ok(()) => self.known_size = Some(at),
                Err(err) => handler.signal_os_error("truncate failed", &err),
            }
        }
    }

    pub fn flush(&mut self, handler: &mut IoErrorHandler) {
        if let Some(file) = self.file.as_mut() {
            if let Err(err) = file.flush() {
                handler.signal_os_error("flush failed", &err);
            }
        }
    }

    /// Releases the descriptor. `Delete` unlinks the path; scratch files
    /// vanish regardless.
    pub fn close(&mut self, status: CloseStatus, handler: &mut IoErrorHandler) {
        if status == CloseStatus::Delete && !self.is_scratch {
            if let Some(path) = &self.path {
                if let Err(err) = fs::remove_file(path) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        handler.signal_os_error(
                            &format!("failed to delete '{}'", path.display()),
                            &err,
                        );
                    }
                }
            }
        }
        if let Some(path) = &self.path {
            debug!(path = %path.display(), ?status, "closed unit file");
        }
        self.file = None;
        self.path = None;
        self.position = 0;
        self.known_size = None;
        self.may_read = false;
        self.may_write = false;
        self.may_position = false;
        self.may_asynchronous = false;
        self.is_terminal = false;
        self.is_scratch = false;
    }
}
