//! # Data Transfer
//!
//! Byte movement between caller buffers and the current record: `emit`
//! writes into the record at the transfer cursor, `receive` reads from
//! it, and `next_input_bytes` lends a view of what is left. All three
//! enforce the record's extent: a fixed-length record refuses writes
//! past `RECL=` (allowing for the format's own terminator overhead) and
//! reads refuse to run past a known record length. Endianness conversion
//! happens here, element by element, so a marker or datum written with
//! `CONVERT=` set round-trips exactly.

use super::ExternalFileUnit;
use crate::encoding::{swap_endianness, RECORD_MARKER_BYTES};
use crate::error::{IoErrorHandler, IoStat};
use crate::types::{Access, Direction};

impl ExternalFileUnit {
    /// Writes `data` into the current record at the transfer cursor.
    /// `element_bytes` is the width of one datum, for byte-order
    /// conversion. Returns false with a fault signaled on overrun or
    /// write-after-endfile.
    pub fn emit(&mut self, data: &[u8], element_bytes: usize, handler: &mut IoErrorHandler) -> bool {
        let bytes = data.len() as i64;
        let furthest_after = self
            .furthest_position_in_record
            .max(self.position_in_record + bytes);
        if let Some(recl) = self.open_recl {
            // Fixed-length overrun check, allowing for the bytes the
            // record format itself appends at AdvanceRecord.
            let mut header: i64 = 0;
            let mut extra: i64 = 0;
            if self.access == Access::Sequential {
                if self.is_unformatted.unwrap_or(false) {
                    header = RECORD_MARKER_BYTES as i64;
                    extra = 2 * header;
                } else {
                    if cfg!(windows) && !self.frame().file().is_windows_text_file() {
                        extra += 1;
                    }
                    extra += 1;
                }
            }
            if furthest_after > extra + recl {
                handler.signal_error(
                    IoStat::RecordWriteOverrun,
                    format!(
                        "attempt to write {} bytes to position {} in a fixed-size record of {} bytes",
                        bytes,
                        self.position_in_record - header,
                        recl
                    ),
                );
                return false;
            }
        }
        if self.access != Access::Direct && self.record_length.is_some() {
            // A leftover length from a BACKSPACE or a non-advancing read;
            // this record is being rewritten.
            self.record_length = None;
            self.began_reading_record = false;
        }
        if self.is_after_endfile() {
            handler.signal_error(
                IoStat::WriteAfterEndfile,
                format!("WRITE(UNIT={}) after ENDFILE", self.unit_number()),
            );
            return false;
        }
        self.check_direct_access(handler);
        let need = (self.record_offset_in_frame + furthest_after) as usize;
        let at = self.frame_offset_in_file;
        self.frame_mut().write_frame(at, need, handler);
        let start = (self.record_offset_in_frame + self.furthest_position_in_record) as usize;
        let cursor = (self.record_offset_in_frame + self.position_in_record) as usize;
        if self.position_in_record > self.furthest_position_in_record {
            // A cursor moved forward by tabbing: fill the gap.
            self.frame_mut().frame_mut()[start..cursor].fill(b' ');
        }
        let swap = self.swap_endianness();
        let frame = self.frame_mut().frame_mut();
        frame[cursor..cursor + data.len()].copy_from_slice(data);
        if swap {
            swap_endianness(&mut frame[cursor..cursor + data.len()], element_bytes);
        }
        self.position_in_record += bytes;
        self.furthest_position_in_record = furthest_after;
        true
    }

    /// Reads `data.len()` bytes from the current record at the transfer
    /// cursor. Returns false with a fault signaled on overrun or end of
    /// file.
    pub fn receive(
        &mut self,
        data: &mut [u8],
        element_bytes: usize,
        handler: &mut IoErrorHandler,
    ) -> bool {
        if self.direction() != Direction::Input {
            handler.crash("receiving on a unit set for output");
        }
        let bytes = data.len() as i64;
        let furthest_after = self
            .furthest_position_in_record
            .max(self.position_in_record + bytes);
        if furthest_after > self.record_length.unwrap_or(furthest_after) {
            handler.signal_error(
                IoStat::RecordReadOverrun,
                format!(
                    "attempt to read {} bytes at position {} in a record of {} bytes",
                    bytes,
                    self.position_in_record,
                    self.record_length.unwrap_or(0)
                ),
            );
            return false;
        }
        let need = (self.record_offset_in_frame + furthest_after) as usize;
        let at = self.frame_offset_in_file;
        let got = self.frame_mut().read_frame(at, need, handler);
        if got < need {
            self.hit_end_on_read(handler);
            return false;
        }
        let cursor = (self.record_offset_in_frame + self.position_in_record) as usize;
        data.copy_from_slice(&self.frame().frame()[cursor..cursor + data.len()]);
        if self.swap_endianness() {
            swap_endianness(data, element_bytes);
        }
        self.position_in_record += bytes;
        self.furthest_position_in_record = furthest_after;
        true
    }

    /// Lends the contiguous input bytes remaining in the current record,
    /// growing the frame as needed. `None` at the record's end or on a
    /// fault.
    pub fn next_input_bytes(&mut self, handler: &mut IoErrorHandler) -> Option<&[u8]> {
        if self.direction() != Direction::Input {
            handler.crash("reading input bytes on a unit set for output");
        }
        let mut length: i64 = 1;
        if let Some(recl) = self.effective_record_length() {
            if self.position_in_record < recl {
                length = recl - self.position_in_record;
            } else {
                return None;
            }
        }
        self.frame_next_input(length as usize, handler)
    }

    fn frame_next_input(&mut self, bytes: usize, handler: &mut IoErrorHandler) -> Option<&[u8]> {
        if self.is_unformatted.unwrap_or(true) {
            handler.crash("byte-wise input is only defined for formatted records");
        }
        let wanted = self.position_in_record + bytes as i64;
        if wanted > self.record_length.unwrap_or(wanted) {
            return None;
        }
        let cursor = (self.record_offset_in_frame + self.position_in_record) as usize;
        let need = cursor + bytes;
        let at = self.frame_offset_in_file;
        let got = self.frame_mut().read_frame(at, need, handler);
        self.set_variable_formatted_record_length();
        if got < need {
            self.hit_end_on_read(handler);
            return None;
        }
        Some(&self.frame().frame()[cursor..cursor + bytes])
    }
}
