//! # Buffered File Frame
//!
//! `FileFrame` is the byte window the record engine works in. The window
//! starts at an arbitrary file offset (`frame_at`) and holds `frame_len`
//! valid bytes. The engine asks for the window to cover a span with
//! `read_frame`/`write_frame`, then addresses bytes relative to the
//! window base with `frame()`/`frame_mut()`.
//!
//! ## Realignment
//!
//! `read_frame(at, need)` makes `at` the new window base. If `at` lies
//! inside the current window the cached bytes slide down and stay valid
//! (cheap forward motion while scanning records); otherwise the cache is
//! discarded and reloaded, which is how `BACKSPACE` walks backward.
//! Reads are chunked ([`MIN_READ_CHUNK`]) on positionable files so a
//! record-boundary scan that grows its request a byte at a time still
//! costs one syscall per kilobyte; sequential files are read exactly,
//! since over-reading a terminal would block on input that was never
//! asked for.
//!
//! ## Dirty Tracking
//!
//! Writes accumulate in a prefix of the window (`write_frame` grows it,
//! the caller fills it through `frame_mut`). `flush` writes back only
//! that prefix, so a window that merely cached input bytes never writes
//! to the file. Any realignment flushes first.

use crate::error::IoErrorHandler;
use crate::storage::OpenFile;

/// Smallest read issued against a positionable file.
pub const MIN_READ_CHUNK: usize = 1024;

#[derive(Debug, Default)]
pub struct FileFrame {
    file: OpenFile,
    buf: Vec<u8>,
    frame_at: i64,
    valid: usize,
    dirty: usize,
}

impl FileFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&self) -> &OpenFile {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut OpenFile {
        &mut self.file
    }

    /// The valid bytes of the window.
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.valid]
    }

    /// Mutable view of the valid bytes of the window.
    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.valid]
    }

    /// Number of valid bytes in the window.
    pub fn frame_len(&self) -> usize {
        self.valid
    }

    /// File offset of the window base.
    pub fn frame_at(&self) -> i64 {
        self.frame_at
    }

    /// Makes `at` the window base and tries to make at least `need` bytes
    /// valid. Returns the valid byte count, which falls short of `need`
    /// only at end of file or after a fault was signaled.
    pub fn read_frame(&mut self, at: i64, need: usize, handler: &mut IoErrorHandler) -> usize {
        self.flush(handler);
        self.realign(at);
        while self.valid < need {
            let want = if self.file.may_position() {
                (need - self.valid).max(MIN_READ_CHUNK)
            } else {
                need - self.valid
            };
            if self.buf.len() < self.valid + want {
                self.buf.resize(self.valid + want, 0);
            }
            let end = self.valid + want;
            let got = self
                .file
                .read_at(self.frame_at + self.valid as i64, &mut self.buf[self.valid..end], handler);
            self.valid += got;
            if got == 0 {
                break;
            }
        }
        self.valid
    }

    /// Makes `at` the window base and ensures `need` writable bytes are
    /// valid, zero-filling any grown tail. The grown prefix is recorded
    /// as dirty and written back on the next flush.
    pub fn write_frame(&mut self, at: i64, need: usize, handler: &mut IoErrorHandler) {
        if at != self.frame_at {
            self.flush(handler);
            self.realign(at);
        }
        if self.buf.len() < need {
            self.buf.resize(need, 0);
        }
        if self.valid < need {
            self.buf[self.valid..need].fill(0);
            self.valid = need;
        }
        self.dirty = self.dirty.max(need);
    }

    /// Writes the dirty prefix back to the file and flushes it.
    pub fn flush(&mut self, handler: &mut IoErrorHandler) {
        if self.dirty > 0 {
            let len = self.dirty.min(self.valid);
            self.file.write_at(self.frame_at, &self.buf[..len], handler);
            self.dirty = 0;
        }
        self.file.flush(handler);
    }

    /// Drops cached bytes at or after file offset `at`.
    pub fn truncate_frame(&mut self, at: i64) {
        if at <= self.frame_at {
            self.frame_at = at;
            self.valid = 0;
            self.dirty = 0;
        } else {
            let keep = ((at - self.frame_at) as usize).min(self.valid);
            self.valid = keep;
            self.dirty = self.dirty.min(keep);
        }
    }

    /// Shrinks the underlying file to `at` bytes.
    pub fn truncate(&mut self, at: i64, handler: &mut IoErrorHandler) {
        self.file.truncate(at, handler);
    }

    fn realign(&mut self, at: i64) {
        debug_assert_eq!(self.dirty, 0);
        if at < self.frame_at || at > self.frame_at + self.valid as i64 {
            self.frame_at = at;
            self.valid = 0;
        } else if at > self.frame_at {
            let skip = (at - self.frame_at) as usize;
            self.buf.copy_within(skip..self.valid, 0);
            self.valid -= skip;
            self.frame_at = at;
        }
    }
}
