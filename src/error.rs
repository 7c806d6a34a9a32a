//! # I/O Status Codes and the Error Handler
//!
//! Every fault in the unit engine surfaces through an [`IoErrorHandler`]
//! owned by the statement in progress. Operations never return `Result`;
//! they record the first fault on the handler and return `false` (or a
//! harmless value), leaving the unit in a state a recovery statement can
//! still work with.
//!
//! ## Signal Classes
//!
//! | Class | Examples | Behavior |
//! |-------|----------|----------|
//! | Semantic errors | wrong access, overrun, bad `REC=` | code + message, operation fails |
//! | End of file | short read past last record | dedicated [`IoStat::End`] code |
//! | Format corruption | header ≠ footer, missing `\n` | code + record number + file offset |
//! | Fatal invariants | wrong direction, non-top child pop | [`IoErrorHandler::crash`] (panic) |
//!
//! ## First Error Wins
//!
//! A handler latches the first non-`Ok` code signaled on it. Later signals
//! are dropped, so a cleanup path running after a failure cannot mask the
//! original fault. This also makes crash-time flushing safe: the flush
//! runs with a fresh handler and any nested fault is recorded, never
//! escalated.

use std::fmt;
use std::io;

/// Status code for a unit operation.
///
/// `#[repr(i32)]` so the discriminant doubles as the numeric status a
/// caller-facing `IOSTAT=` variable would receive: `0` for success,
/// negative for end conditions, `>= 256` for errors.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IoStat {
    #[default]
    Ok = 0,
    End = -1,

    /// Message-only faults and operating system errors.
    GenericError = 256,
    ReadFromWriteOnly,
    WriteToReadOnly,
    OpenBadRecl,
    OpenAlreadyConnected,
    RecordWriteOverrun,
    RecordReadOverrun,
    WriteAfterEndfile,
    BackspaceNonSequential,
    BackspaceAtFirstRecord,
    BadUnformattedRecord,
    ShortRead,
    MissingTerminator,
    EndfileDirect,
    EndfileUnwritable,
    RewindNonSequential,
    BadAsynchronous,
    TooManyAsyncOps,
    UnformattedChildOnFormattedParent,
    FormattedChildOnUnformattedParent,
    ChildOutputToInputParent,
    ChildInputFromOutputParent,
}

impl IoStat {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for IoStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per-statement fault collector.
///
/// Created fresh by the caller for each statement, passed by `&mut` into
/// every fallible engine operation, and inspected once the statement ends.
#[derive(Debug, Default)]
pub struct IoErrorHandler {
    stat: IoStat,
    message: Option<String>,
}

impl IoErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `stat` with a formatted message unless a fault is already
    /// latched. Signaling `IoStat::Ok` is a no-op.
    pub fn signal_error(&mut self, stat: IoStat, message: impl Into<String>) {
        if stat != IoStat::Ok && self.stat == IoStat::Ok {
            self.stat = stat;
            self.message = Some(message.into());
        }
    }

    /// Records a bare code with no message.
    pub fn signal_code(&mut self, stat: IoStat) {
        if stat != IoStat::Ok && self.stat == IoStat::Ok {
            self.stat = stat;
        }
    }

    /// Records an end-of-file condition.
    pub fn signal_end(&mut self) {
        self.signal_code(IoStat::End);
    }

    /// Records an operating system error with the failing operation named.
    pub fn signal_os_error(&mut self, what: &str, err: &io::Error) {
        self.signal_error(IoStat::GenericError, format!("{}: {}", what, err));
    }

    pub fn io_stat(&self) -> IoStat {
        self.stat
    }

    /// True once any non-`Ok` code (including `End`) has been signaled.
    pub fn in_error(&self) -> bool {
        self.stat != IoStat::Ok
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Reports an unrecoverable invariant violation.
    pub fn crash(&self, message: impl AsRef<str>) -> ! {
        panic!("fatal I/O runtime error: {}", message.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let mut handler = IoErrorHandler::new();
        handler.signal_error(IoStat::RecordReadOverrun, "first");
        handler.signal_error(IoStat::ShortRead, "second");
        assert_eq!(handler.io_stat(), IoStat::RecordReadOverrun);
        assert_eq!(handler.message(), Some("first"));
    }

    #[test]
    fn signaling_ok_is_a_no_op() {
        let mut handler = IoErrorHandler::new();
        handler.signal_code(IoStat::Ok);
        assert!(!handler.in_error());
        assert_eq!(handler.io_stat(), IoStat::Ok);
    }

    #[test]
    fn end_counts_as_in_error() {
        let mut handler = IoErrorHandler::new();
        handler.signal_end();
        assert!(handler.in_error());
        assert_eq!(handler.io_stat(), IoStat::End);
        assert_eq!(handler.io_stat().code(), -1);
    }

    #[test]
    fn end_does_not_mask_a_later_inspection_of_code() {
        let mut handler = IoErrorHandler::new();
        handler.signal_end();
        handler.signal_error(IoStat::BadUnformattedRecord, "corrupt");
        assert_eq!(handler.io_stat(), IoStat::End);
    }

    #[test]
    #[should_panic(expected = "fatal I/O runtime error")]
    fn crash_panics() {
        let handler = IoErrorHandler::new();
        handler.crash("wrong direction");
    }
}
