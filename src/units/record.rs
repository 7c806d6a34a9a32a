//! # Record Engine
//!
//! One record at a time: beginning and finishing reads, advancing after
//! writes, backspacing, and the endfile family, for each of the five
//! record formats.
//!
//! ## Record Formats
//!
//! | Format | Boundary |
//! |--------|----------|
//! | direct | fixed `RECL=` bytes, padded on output |
//! | sequential unformatted | 4-byte length marker before and after the payload |
//! | sequential formatted | `\n`, optionally preceded by `\r` |
//! | stream formatted | `\n`, byte-addressable between records |
//! | stream unformatted | none; a pure byte sink |
//!
//! ## Forward Motion
//!
//! Reading parses the next boundary into `record_length`
//! (`begin_reading_record`), the transfer layer consumes bytes, and
//! `finish_reading_record` walks the frame past the record and its
//! terminator. Writing emits into the frame and `advance_record` seals
//! the boundary: padding for direct access, the marker pair for
//! sequential unformatted, the line ending for formatted records.
//!
//! ## Backward Motion
//!
//! `BACKSPACE` undoes one record by reading structure backwards: fixed
//! records subtract `RECL=`, unformatted records read the previous
//! footer to learn how far back to seek, and formatted records scan
//! backward for the preceding newline, sliding the frame a kilobyte at a
//! time when the boundary lies outside it.
//!
//! ## Endfile
//!
//! An endfile is a position, not bytes: `do_endfile` records it and
//! truncates. Any write that leaves position mid-file on a record file
//! arms `implied_endfile`, and the next positioning operation completes
//! the truncation so stale tail records never survive a rewrite.

use tracing::trace;

use super::registry;
use super::ExternalFileUnit;
use crate::encoding::{decode_record_marker, find_last_newline, RECORD_MARKER_BYTES};
use crate::error::{IoErrorHandler, IoStat};
use crate::types::{Access, Direction};

/// Marker width as a file-offset quantity.
const MARKER: i64 = RECORD_MARKER_BYTES as i64;

/// How far the backward newline scan slides the frame per step.
const BACKSPACE_SCAN_STEP: i64 = 1024;

impl ExternalFileUnit {
    /// Establishes the current input record's extent. Idempotent until
    /// [`Self::finish_reading_record`] clears the latch. Returns false
    /// when a fault (including end of file) was signaled.
    pub fn begin_reading_record(&mut self, handler: &mut IoErrorHandler) -> bool {
        if self.direction() != Direction::Input {
            handler.crash("beginning a record read on a unit set for output");
        }
        if !self.began_reading_record {
            self.began_reading_record = true;
            if self.access == Access::Direct {
                self.check_direct_access(handler);
                if let Some(recl) = self.open_recl {
                    let need = (self.record_offset_in_frame + recl) as usize;
                    let got = self.frame_mut_read(need, handler);
                    if got >= need {
                        self.record_length = self.open_recl;
                    } else {
                        self.record_length = None;
                        self.hit_end_on_read(handler);
                    }
                }
            } else {
                self.record_length = None;
                if self.is_at_eof() {
                    handler.signal_end();
                } else {
                    match self.is_unformatted {
                        None => handler.crash("formatting of the unit is not established"),
                        Some(true) => {
                            if self.access == Access::Sequential {
                                self.begin_sequential_variable_unformatted_input_record(handler);
                            }
                        }
                        Some(false) => self.begin_variable_formatted_input_record(handler),
                    }
                }
            }
        }
        if self.record_length.is_none() && self.is_record_file() && !handler.in_error() {
            handler.crash("record length not established after beginning a read");
        }
        !handler.in_error()
    }

    /// Steps past the current input record and its terminator, leaving
    /// the unit at the start of the next record.
    pub fn finish_reading_record(&mut self, handler: &mut IoErrorHandler) {
        if self.direction() != Direction::Input || !self.began_reading_record {
            handler.crash("finishing a record read that was never begun");
        }
        self.began_reading_record = false;
        if handler.io_stat() == IoStat::End
            || (self.is_record_file() && self.record_length.is_none())
        {
            // END or ERR in flight: still step the counter so a following
            // BACKSPACE lands before the endfile record.
            self.current_record_number += 1;
        } else if self.is_record_file() {
            if let Some(length) = self.record_length {
                self.record_offset_in_frame += length;
            }
            if self.access != Access::Direct {
                let unformatted = match self.is_unformatted {
                    Some(mode) => mode,
                    None => handler.crash("formatting of the unit is not established"),
                };
                self.record_length = None;
                if unformatted {
                    // Keep the footer in the frame; BACKSPACE rereads it.
                    self.frame_offset_in_file += self.record_offset_in_frame;
                    self.record_offset_in_frame = MARKER;
                } else {
                    let offset = self.record_offset_in_frame as usize;
                    let frame = self.frame().frame();
                    let mut skip = 0usize;
                    if frame.len() > offset && frame[offset] == b'\r' {
                        skip += 1;
                    }
                    if frame.len() > offset + skip && frame[offset + skip] == b'\n' {
                        skip += 1;
                    }
                    self.record_offset_in_frame += skip as i64;
                    if !self.pinned_frame || self.may_position() {
                        self.frame_offset_in_file += self.record_offset_in_frame;
                        self.record_offset_in_frame = 0;
                    }
                }
            }
            self.current_record_number += 1;
        } else {
            // Unformatted stream: just account for the bytes consumed.
            self.furthest_position_in_record = self
                .furthest_position_in_record
                .max(self.position_in_record);
            self.frame_offset_in_file +=
                self.record_offset_in_frame + self.furthest_position_in_record;
        }
        self.begin_record();
    }

    /// Completes the current record. On input, a finish-then-begin; on
    /// output, seals the record boundary for the connection's format.
    pub fn advance_record(&mut self, handler: &mut IoErrorHandler) -> bool {
        if self.direction() == Direction::Input {
            self.finish_reading_record(handler);
            return self.begin_reading_record(handler);
        }
        let unformatted = match self.is_unformatted {
            Some(mode) => mode,
            None => handler.crash("formatting of the unit is not established"),
        };
        let mut ok = true;
        self.position_in_record = self.furthest_position_in_record;
        if self.access == Access::Direct {
            if let Some(recl) = self.open_recl {
                if self.furthest_position_in_record < recl {
                    // Pad the fixed-length record out to RECL.
                    let need = (self.record_offset_in_frame + recl) as usize;
                    let start =
                        (self.record_offset_in_frame + self.furthest_position_in_record) as usize;
                    let fill = if unformatted { 0 } else { b' ' };
                    let at = self.frame_offset_in_file;
                    self.frame_mut().write_frame(at, need, handler);
                    self.frame_mut().frame_mut()[start..need].fill(fill);
                    self.furthest_position_in_record = recl;
                }
            }
        } else if unformatted {
            if self.access == Access::Sequential {
                // Emit the payload length as the footer, then overwrite
                // the reserved leading marker with the same value. The
                // marker is a 4-byte element so CONVERT= applies to it.
                let length = (self.furthest_position_in_record - MARKER) as u32;
                let marker = length.to_ne_bytes();
                ok = ok && self.emit(&marker, RECORD_MARKER_BYTES, handler);
                self.position_in_record = 0;
                ok = ok && self.emit(&marker, RECORD_MARKER_BYTES, handler);
            }
        } else if handler.io_stat() != IoStat::Ok && self.furthest_position_in_record == 0 {
            // Failed formatted write with nothing in the record: leave
            // the file alone.
            return true;
        } else {
            let line_ending: &[u8] =
                if cfg!(windows) && !self.frame().file().is_windows_text_file() {
                    b"\r\n"
                } else {
                    b"\n"
                };
            ok = ok && self.emit(line_ending, 1, handler);
        }
        self.left_tab_limit = None;
        if self.is_after_endfile() {
            return false;
        }
        self.commit_writes();
        self.current_record_number += 1;
        if self.access != Access::Direct {
            self.implied_endfile = self.is_record_file();
            if self.is_at_eof() {
                self.endfile_record_number = None;
            }
        }
        ok
    }

    /// Positions the unit before the previous record.
    pub fn backspace_record(&mut self, handler: &mut IoErrorHandler) {
        if self.access == Access::Direct || !self.is_record_file() {
            handler.signal_error(
                IoStat::BackspaceNonSequential,
                format!(
                    "BACKSPACE(UNIT={}) on direct-access file or unformatted stream",
                    self.unit_number()
                ),
            );
            return;
        }
        if self.is_after_endfile() {
            // BACKSPACE after explicit ENDFILE: step back onto it.
            if let Some(endfile) = self.endfile_record_number() {
                self.current_record_number = endfile;
            }
        } else if self.left_tab_limit.is_some() {
            // BACKSPACE after non-advancing I/O stays in this record.
            self.left_tab_limit = None;
        } else {
            self.do_implied_endfile(handler);
            if self.frame_offset_in_file + self.record_offset_in_frame > 0 {
                self.current_record_number -= 1;
                if self.open_recl.is_some() && self.access == Access::Direct {
                    self.backspace_fixed_record(handler);
                } else {
                    match self.is_unformatted {
                        None => handler.crash("formatting of the unit is not established"),
                        Some(true) => self.backspace_variable_unformatted_record(handler),
                        Some(false) => self.backspace_variable_formatted_record(handler),
                    }
                }
            }
        }
        self.begin_record();
    }

    /// Writes an endfile at the current position.
    pub fn endfile(&mut self, handler: &mut IoErrorHandler) {
        if self.access == Access::Direct {
            handler.signal_error(
                IoStat::EndfileDirect,
                format!("ENDFILE(UNIT={}) on direct-access file", self.unit_number()),
            );
        } else if !self.may_write() {
            handler.signal_error(
                IoStat::EndfileUnwritable,
                format!("ENDFILE(UNIT={}) on read-only file", self.unit_number()),
            );
        } else if self.is_after_endfile() {
            // ENDFILE after ENDFILE: nothing to do.
        } else {
            self.do_endfile(handler);
            if self.is_record_file() && self.access != Access::Direct {
                // Explicit ENDFILE leaves the position after the endfile
                // record.
                match self.endfile_record_number() {
                    Some(endfile) => self.current_record_number = endfile + 1,
                    None => handler.crash("endfile record number unset after ENDFILE"),
                }
            }
        }
    }

    /// Repositions to the first record.
    pub fn rewind(&mut self, handler: &mut IoErrorHandler) {
        if self.access == Access::Direct {
            handler.signal_error(
                IoStat::RewindNonSequential,
                format!("REWIND(UNIT={}) on non-sequential file", self.unit_number()),
            );
        } else {
            self.set_position(0, handler);
            self.current_record_number = 1;
            self.left_tab_limit = None;
        }
    }

    /// Moves to an absolute byte position and starts a fresh record.
    pub fn set_position(&mut self, position: i64, handler: &mut IoErrorHandler) {
        self.do_implied_endfile(handler);
        self.frame_offset_in_file = position;
        self.record_offset_in_frame = 0;
        if self.access == Access::Direct {
            self.direct_access_rec_was_set = true;
        }
        self.begin_record();
    }

    /// `POS=`: one-based byte position on a stream connection.
    pub fn set_stream_pos(&mut self, one_based_pos: i64, handler: &mut IoErrorHandler) -> bool {
        if self.access != Access::Stream {
            handler.signal_error(
                IoStat::GenericError,
                "POS= may not appear unless ACCESS='STREAM'",
            );
            return false;
        }
        if one_based_pos < 1 {
            handler.signal_error(
                IoStat::GenericError,
                format!("POS={} is invalid", one_based_pos),
            );
            return false;
        }
        self.set_position(one_based_pos - 1, handler);
        // Which record this lands in is unknowable; park the counter
        // midway so both advancing and backspacing stay representable.
        self.current_record_number = i64::MAX / 2;
        self.endfile_record_number = None;
        true
    }

    /// `REC=`: one-based record number on a direct-access connection.
    pub fn set_direct_rec(&mut self, one_based_rec: i64, handler: &mut IoErrorHandler) -> bool {
        if self.access != Access::Direct {
            handler.signal_error(
                IoStat::GenericError,
                "REC= may not appear unless ACCESS='DIRECT'",
            );
            return false;
        }
        let Some(recl) = self.open_recl else {
            handler.signal_error(IoStat::GenericError, "RECL= was not specified");
            return false;
        };
        if one_based_rec < 1 {
            handler.signal_error(
                IoStat::GenericError,
                format!("REC={} is invalid", one_based_rec),
            );
            return false;
        }
        self.current_record_number = one_based_rec;
        self.set_position((one_based_rec - 1) * recl, handler);
        true
    }

    /// Writes buffered output through to the file. On a file that cannot
    /// be repositioned, pending writes are committed first so the frame
    /// never needs an impossible seek.
    pub fn flush_output(&mut self, handler: &mut IoErrorHandler) {
        if !self.may_position() {
            let frame_at = self.frame().frame_at();
            let frame_end = frame_at + self.frame().frame_len() as i64;
            if self.frame_offset_in_file >= frame_at && self.frame_offset_in_file < frame_end {
                self.commit_writes();
                self.left_tab_limit = None;
            }
        }
        self.frame_mut().flush(handler);
    }

    /// Flushes if the unit is connected to a terminal, so interactive
    /// output appears promptly.
    pub fn flush_if_terminal(&mut self, handler: &mut IoErrorHandler) {
        if self.is_terminal() {
            self.flush_output(handler);
        }
    }

    /// Completes a pending endfile before a positioning operation. A
    /// partial non-advancing write is finished first, which usually arms
    /// the pending endfile it then performs.
    pub(super) fn do_implied_endfile(&mut self, handler: &mut IoErrorHandler) {
        if !self.implied_endfile
            && self.direction() == Direction::Output
            && self.is_record_file()
            && self.access != Access::Direct
            && self.left_tab_limit.is_some()
        {
            self.advance_record(handler);
        }
        if self.implied_endfile {
            self.implied_endfile = false;
            if self.access != Access::Direct && self.is_record_file() && self.may_position() {
                self.do_endfile(handler);
            }
        }
    }

    /// Records the endfile position and truncates file and frame there.
    pub(super) fn do_endfile(&mut self, handler: &mut IoErrorHandler) {
        if self.is_record_file() && self.access != Access::Direct {
            self.furthest_position_in_record = self
                .furthest_position_in_record
                .max(self.position_in_record);
            if self.left_tab_limit.is_some() {
                // The last transfer was non-advancing, so its record was
                // never advanced past.
                self.left_tab_limit = None;
                self.current_record_number += 1;
            }
            self.endfile_record_number = Some(self.current_record_number);
        }
        self.frame_offset_in_file += self.record_offset_in_frame + self.furthest_position_in_record;
        self.record_offset_in_frame = 0;
        self.flush_output(handler);
        let at = self.frame_offset_in_file;
        trace!(unit = self.unit_number(), offset = at, "truncating at endfile");
        self.frame_mut().truncate(at, handler);
        self.frame_mut().truncate_frame(at);
        self.begin_record();
        self.implied_endfile = false;
    }

    /// Moves the frame base past everything written into the current
    /// record and starts a fresh one.
    pub(super) fn commit_writes(&mut self) {
        self.frame_offset_in_file += self.record_offset_in_frame
            + self
                .record_length
                .unwrap_or(self.furthest_position_in_record);
        self.record_offset_in_frame = 0;
        self.begin_record();
    }

    /// Direct access requires `REC=` before any transfer.
    pub(super) fn check_direct_access(&mut self, handler: &mut IoErrorHandler) -> bool {
        if self.access == Access::Direct {
            if self.open_recl.is_none() {
                handler.crash("direct-access unit has no record length");
            }
            if !self.direct_access_rec_was_set {
                handler.signal_error(
                    IoStat::GenericError,
                    "no REC= was specified for a data transfer with ACCESS='DIRECT'",
                );
                return false;
            }
        }
        true
    }

    /// A short read means end of file; on a record file the current
    /// record becomes the endfile record.
    pub(super) fn hit_end_on_read(&mut self, handler: &mut IoErrorHandler) {
        handler.signal_end();
        if self.is_record_file() && self.access != Access::Direct {
            self.endfile_record_number = Some(self.current_record_number);
        }
    }

    /// Finds the `\n` delimiting the current variable-length formatted
    /// record within the frame, net of a trailing `\r`. True once the
    /// length is known.
    pub(super) fn set_variable_formatted_record_length(&mut self) -> bool {
        if self.record_length.is_some() || self.access == Access::Direct {
            return true;
        }
        let offset = self.record_offset_in_frame as usize;
        if self.frame().frame_len() > offset {
            let record = &self.frame().frame()[offset..];
            if let Some(newline) = record.iter().position(|&b| b == b'\n') {
                let mut length = newline as i64;
                if length > 0 && record[newline - 1] == b'\r' {
                    length -= 1;
                }
                self.record_length = Some(length);
                return true;
            }
        }
        false
    }

    fn begin_sequential_variable_unformatted_input_record(&mut self, handler: &mut IoErrorHandler) {
        let record_offset = self.record_offset_in_frame;
        let mut error = None;
        let need = (record_offset + MARKER) as usize;
        let got = self.frame_mut_read(need, handler);
        if got < need {
            if got == record_offset as usize {
                self.hit_end_on_read(handler);
            } else {
                error = Some("truncated record header".to_string());
            }
        } else {
            let header = self.read_record_marker(record_offset) as i64;
            let length = MARKER + header;
            self.record_length = Some(length);
            let need = (record_offset + length + MARKER) as usize;
            let got = self.frame_mut_read(need, handler);
            if got < need {
                error = Some(format!(
                    "hit EOF reading record with length {} bytes",
                    header
                ));
            } else {
                let footer = self.read_record_marker(record_offset + length) as i64;
                if footer != header {
                    error = Some(format!(
                        "record header has length {} that does not match record footer ({})",
                        header, footer
                    ));
                }
            }
        }
        if let Some(detail) = error {
            handler.signal_error(
                IoStat::BadUnformattedRecord,
                format!(
                    "unformatted variable-length sequential input failed at record #{} (file offset {}): {}",
                    self.current_record_number, self.frame_offset_in_file, detail
                ),
            );
        }
        self.position_in_record = MARKER;
    }

    fn begin_variable_formatted_input_record(&mut self, handler: &mut IoErrorHandler) {
        if registry::is_default_input(self.unit_number()) {
            // Prompts written to the default output units must appear
            // before the program blocks reading stdin.
            registry::flush_default_outputs();
        }
        let record_offset = self.record_offset_in_frame as usize;
        let mut length: i64 = 0;
        loop {
            let need = length + 1;
            let got = self.frame_mut_read(record_offset + need as usize, handler);
            length = got as i64 - record_offset as i64;
            if length < need {
                if length > 0 {
                    // Final record without a terminator.
                    self.record_length = Some(length);
                    self.unterminated_record = true;
                } else {
                    self.hit_end_on_read(handler);
                }
                break;
            }
            if self.set_variable_formatted_record_length() {
                break;
            }
        }
    }

    fn backspace_fixed_record(&mut self, handler: &mut IoErrorHandler) {
        let Some(recl) = self.open_recl else {
            handler.crash("fixed-record backspace without a record length");
        };
        if self.frame_offset_in_file < recl {
            handler.signal_error(
                IoStat::BackspaceAtFirstRecord,
                format!("BACKSPACE(UNIT={}) at first record", self.unit_number()),
            );
        } else {
            self.frame_offset_in_file -= recl;
        }
    }

    fn backspace_variable_unformatted_record(&mut self, handler: &mut IoErrorHandler) {
        self.frame_offset_in_file += self.record_offset_in_frame;
        self.record_offset_in_frame = 0;
        if self.frame_offset_in_file <= MARKER {
            handler.signal_error(
                IoStat::BackspaceAtFirstRecord,
                format!("BACKSPACE(UNIT={}) at first record", self.unit_number()),
            );
            return;
        }
        // Structure before this point was validated when it was read
        // forward; torn frames here read as short.
        let at = self.frame_offset_in_file - MARKER;
        let got = self
            .frame_mut()
            .read_frame(at, RECORD_MARKER_BYTES, handler);
        if got < RECORD_MARKER_BYTES {
            handler.signal_error(
                IoStat::ShortRead,
                format!(
                    "BACKSPACE(UNIT={}): could not read the previous record footer",
                    self.unit_number()
                ),
            );
            return;
        }
        let length = self.read_record_marker(0) as i64;
        self.record_length = Some(length);
        if self.frame_offset_in_file < length + 2 * MARKER {
            handler.signal_error(
                IoStat::BadUnformattedRecord,
                format!(
                    "BACKSPACE(UNIT={}): previous record length {} overruns the file start",
                    self.unit_number(),
                    length
                ),
            );
            return;
        }
        self.frame_offset_in_file -= length + 2 * MARKER;
        let need = (self.record_offset_in_frame + MARKER + length) as usize;
        let got = self.frame_mut_read(need, handler);
        if got < need {
            handler.signal_error(
                IoStat::ShortRead,
                format!(
                    "BACKSPACE(UNIT={}): could not reread the previous record",
                    self.unit_number()
                ),
            );
            return;
        }
        let header = self.read_record_marker(self.record_offset_in_frame) as i64;
        if header != length {
            handler.signal_error(
                IoStat::BadUnformattedRecord,
                format!(
                    "BACKSPACE(UNIT={}): record header {} does not match record footer {}",
                    self.unit_number(),
                    header,
                    length
                ),
            );
        }
    }

    fn backspace_variable_formatted_record(&mut self, handler: &mut IoErrorHandler) {
        // File offset of the newline terminating the previous record.
        let prev_newline = self.frame_offset_in_file + self.record_offset_in_frame - 1;
        if prev_newline < 0 {
            handler.signal_error(
                IoStat::BackspaceAtFirstRecord,
                format!("BACKSPACE(UNIT={}) at first record", self.unit_number()),
            );
            return;
        }
        loop {
            if self.frame_offset_in_file < prev_newline {
                // The frame spans back to the previous record whenever
                // the record offset is nonzero.
                let span = ((prev_newline - self.frame_offset_in_file) as usize)
                    .min(self.frame().frame_len());
                if let Some(found) = find_last_newline(&self.frame().frame()[..span]) {
                    self.record_offset_in_frame = found as i64 + 1;
                    self.record_length = Some(
                        prev_newline - (self.frame_offset_in_file + self.record_offset_in_frame),
                    );
                    break;
                }
            }
            if self.frame_offset_in_file == 0 {
                self.record_offset_in_frame = 0;
                self.record_length = Some(prev_newline);
                break;
            }
            self.frame_offset_in_file -= self.frame_offset_in_file.min(BACKSPACE_SCAN_STEP);
            let need = (prev_newline + 1 - self.frame_offset_in_file) as usize;
            let got = self.frame_mut_read(need, handler);
            if got < need {
                handler.signal_error(
                    IoStat::ShortRead,
                    format!(
                        "BACKSPACE(UNIT={}): file shrank while scanning for the previous record",
                        self.unit_number()
                    ),
                );
                return;
            }
        }
        if let Some(length) = self.record_length {
            let end = (self.record_offset_in_frame + length) as usize;
            if self.frame().frame().get(end) != Some(&b'\n') {
                handler.signal_error(
                    IoStat::MissingTerminator,
                    format!(
                        "BACKSPACE(UNIT={}): record at file offset {} has no terminator",
                        self.unit_number(),
                        self.frame_offset_in_file + self.record_offset_in_frame
                    ),
                );
                return;
            }
            if length > 0 && self.frame().frame()[end - 1] == b'\r' {
                self.record_length = Some(length - 1);
            }
        }
    }

    /// Reads a record length marker at a frame-relative offset,
    /// honoring the connection's byte-order conversion.
    pub(super) fn read_record_marker(&self, frame_offset: i64) -> i32 {
        decode_record_marker(
            &self.frame().frame()[frame_offset as usize..],
            self.swap_endianness(),
        )
    }

    /// Grows the frame at the unit's current base.
    fn frame_mut_read(&mut self, need: usize, handler: &mut IoErrorHandler) -> usize {
        let at = self.frame_offset_in_file;
        self.frame_mut().read_frame(at, need, handler)
    }
}
