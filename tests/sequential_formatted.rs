//! # Sequential Formatted Record Tests
//!
//! Newline-delimited variable-length records: write/read round trips,
//! CRLF handling, backspace (including the backward scan across the
//! frame-slide boundary), rewind, endfile interplay, and overrun checks.

use std::path::Path;

use recio::{
    Access, Action, Convert, Direction, ExternalFileUnit, IoErrorHandler, IoStat, OpenStatus,
    Position,
};
use tempfile::tempdir;

fn open_unit(path: &Path, number: i32) -> ExternalFileUnit {
    let mut unit = ExternalFileUnit::new(number);
    unit.access = Access::Sequential;
    unit.is_unformatted = Some(false);
    let mut handler = IoErrorHandler::new();
    unit.open_unit(
        Some(OpenStatus::Unknown),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.to_path_buf()),
        Convert::Unknown,
        &mut handler,
    );
    assert!(!handler.in_error(), "{:?}", handler.message());
    unit
}

fn write_record(unit: &mut ExternalFileUnit, text: &[u8]) {
    let mut handler = IoErrorHandler::new();
    assert!(unit.emit(text, 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    assert!(!handler.in_error(), "{:?}", handler.message());
}

fn read_record(unit: &mut ExternalFileUnit, expected: &[u8]) {
    let mut handler = IoErrorHandler::new();
    assert!(unit.begin_reading_record(&mut handler), "{:?}", handler.message());
    assert_eq!(unit.record_length, Some(expected.len() as i64));
    let mut data = vec![0u8; expected.len()];
    if !data.is_empty() {
        assert!(unit.receive(&mut data, 1, &mut handler));
    }
    assert_eq!(data, expected);
    unit.finish_reading_record(&mut handler);
    assert!(!handler.in_error(), "{:?}", handler.message());
}

mod round_trips {
    use super::*;

    #[test]
    fn written_records_read_back_byte_for_byte() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let mut unit = open_unit(&path, 20);
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        write_record(&mut unit, b"alpha");
        write_record(&mut unit, b"");
        write_record(&mut unit, b"gamma rays");

        let mut handler = IoErrorHandler::new();
        unit.rewind(&mut handler);
        assert!(!handler.in_error());
        assert_eq!(unit.current_record_number, 1);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        read_record(&mut unit, b"alpha");
        read_record(&mut unit, b"");
        read_record(&mut unit, b"gamma rays");
    }

    #[test]
    fn on_disk_form_is_newline_terminated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let mut unit = open_unit(&path, 21);
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        write_record(&mut unit, b"Hi");
        let mut handler = IoErrorHandler::new();
        unit.flush_output(&mut handler);
        assert_eq!(std::fs::read(&path).unwrap(), b"Hi\n");
    }

    #[test]
    fn rewind_then_reading_n_records_lands_on_record_n() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let mut unit = open_unit(&path, 22);
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        for text in [b"one".as_slice(), b"two", b"three"] {
            write_record(&mut unit, text);
        }
        let mut handler = IoErrorHandler::new();
        unit.rewind(&mut handler);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        read_record(&mut unit, b"one");
        read_record(&mut unit, b"two");
        assert_eq!(unit.current_record_number, 3);
        let mut handler = IoErrorHandler::new();
        assert!(unit.begin_reading_record(&mut handler));
        assert_eq!(unit.record_length, Some(5));
    }
}

mod terminators {
    use super::*;

    #[test]
    fn carriage_returns_are_stripped_from_crlf_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crlf.txt");
        std::fs::write(&path, b"abc\r\ndef\n").unwrap();
        let mut unit = open_unit(&path, 23);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);

        let mut handler = IoErrorHandler::new();
        assert!(unit.begin_reading_record(&mut handler));
        assert_eq!(unit.record_length, Some(3));
        let mut data = [0u8; 3];
        assert!(unit.receive(&mut data, 1, &mut handler));
        assert_eq!(&data, b"abc");

        assert!(unit.advance_record(&mut handler));
        assert_eq!(unit.record_length, Some(3));
        let mut data = [0u8; 3];
        assert!(unit.receive(&mut data, 1, &mut handler));
        assert_eq!(&data, b"def");

        let mut handler = IoErrorHandler::new();
        assert!(!unit.advance_record(&mut handler));
        assert_eq!(handler.io_stat(), IoStat::End);
    }

    #[test]
    fn a_final_record_without_newline_is_flagged_unterminated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tail.txt");
        std::fs::write(&path, b"abc").unwrap();
        let mut unit = open_unit(&path, 24);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        let mut handler = IoErrorHandler::new();
        assert!(unit.begin_reading_record(&mut handler));
        assert_eq!(unit.record_length, Some(3));
        assert!(unit.unterminated_record);
        let mut data = [0u8; 3];
        assert!(unit.receive(&mut data, 1, &mut handler));
        assert_eq!(&data, b"abc");
    }

    #[test]
    fn an_empty_file_signals_end_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();
        let mut unit = open_unit(&path, 25);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        let mut handler = IoErrorHandler::new();
        assert!(!unit.begin_reading_record(&mut handler));
        assert_eq!(handler.io_stat(), IoStat::End);
    }

    #[test]
    fn reading_past_the_record_overruns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.txt");
        std::fs::write(&path, b"ab\n").unwrap();
        let mut unit = open_unit(&path, 26);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        let mut handler = IoErrorHandler::new();
        assert!(unit.begin_reading_record(&mut handler));
        let mut data = [0u8; 5];
        assert!(!unit.receive(&mut data, 1, &mut handler));
        assert_eq!(handler.io_stat(), IoStat::RecordReadOverrun);
    }
}

mod backspace {
    use super::*;

    #[test]
    fn backspace_then_reread_returns_the_same_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let mut unit = open_unit(&path, 27);
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        write_record(&mut unit, b"first");
        write_record(&mut unit, b"second");
        write_record(&mut unit, b"third");

        let mut handler = IoErrorHandler::new();
        unit.rewind(&mut handler);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        read_record(&mut unit, b"first");
        read_record(&mut unit, b"second");
        assert_eq!(unit.current_record_number, 3);

        let mut handler = IoErrorHandler::new();
        unit.backspace_record(&mut handler);
        assert!(!handler.in_error(), "{:?}", handler.message());
        assert_eq!(unit.current_record_number, 2);
        read_record(&mut unit, b"second");
        read_record(&mut unit, b"third");
    }

    #[test]
    fn backward_scan_slides_the_frame_across_kilobyte_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.txt");
        let mut contents = Vec::new();
        for fill in [b'a', b'b', b'c'] {
            contents.extend(std::iter::repeat(fill).take(1000));
            contents.push(b'\n');
        }
        std::fs::write(&path, &contents).unwrap();

        let mut unit = open_unit(&path, 28);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        read_record(&mut unit, &vec![b'a'; 1000]);
        read_record(&mut unit, &vec![b'b'; 1000]);
        read_record(&mut unit, &vec![b'c'; 1000]);
        assert_eq!(unit.current_record_number, 4);

        let mut handler = IoErrorHandler::new();
        unit.backspace_record(&mut handler);
        assert!(!handler.in_error(), "{:?}", handler.message());
        assert_eq!(unit.current_record_number, 3);
        read_record(&mut unit, &vec![b'c'; 1000]);
    }

    #[test]
    fn backspace_at_the_start_of_the_file_is_a_no_op() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        std::fs::write(&path, b"only\n").unwrap();
        let mut unit = open_unit(&path, 29);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        let mut handler = IoErrorHandler::new();
        unit.backspace_record(&mut handler);
        assert!(!handler.in_error());
        assert_eq!(unit.current_record_number, 1);
        read_record(&mut unit, b"only");
    }

    #[test]
    fn backspace_after_hitting_end_lands_before_the_endfile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        std::fs::write(&path, b"one\ntwo\n").unwrap();
        let mut unit = open_unit(&path, 30);
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        read_record(&mut unit, b"one");
        read_record(&mut unit, b"two");

        let mut handler = IoErrorHandler::new();
        assert!(!unit.begin_reading_record(&mut handler));
        assert_eq!(handler.io_stat(), IoStat::End);
        unit.finish_reading_record(&mut handler);

        let mut handler = IoErrorHandler::new();
        unit.backspace_record(&mut handler);
        unit.backspace_record(&mut handler);
        assert!(!handler.in_error(), "{:?}", handler.message());
        read_record(&mut unit, b"two");
    }
}

mod endfile {
    use super::*;

    #[test]
    fn writes_after_an_explicit_endfile_are_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let mut unit = open_unit(&path, 31);
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        write_record(&mut unit, b"kept");
        let mut handler = IoErrorHandler::new();
        unit.endfile(&mut handler);
        assert!(!handler.in_error(), "{:?}", handler.message());

        let mut handler = IoErrorHandler::new();
        assert!(!unit.emit(b"lost", 1, &mut handler));
        assert_eq!(handler.io_stat(), IoStat::WriteAfterEndfile);
    }

    #[test]
    fn endfile_truncates_the_tail_of_a_rewritten_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let mut unit = open_unit(&path, 32);
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        write_record(&mut unit, b"aaaa");
        write_record(&mut unit, b"bbbb");
        write_record(&mut unit, b"cccc");

        let mut handler = IoErrorHandler::new();
        unit.rewind(&mut handler);
        write_record(&mut unit, b"AAAA");
        unit.endfile(&mut handler);
        unit.close_unit(recio::CloseStatus::Keep, &mut handler);
        assert!(!handler.in_error(), "{:?}", handler.message());
        assert_eq!(std::fs::read(&path).unwrap(), b"AAAA\n");
    }

    #[test]
    fn endfile_twice_is_harmless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let mut unit = open_unit(&path, 33);
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        write_record(&mut unit, b"data");
        let mut handler = IoErrorHandler::new();
        unit.endfile(&mut handler);
        unit.endfile(&mut handler);
        assert!(!handler.in_error());
    }

    #[test]
    fn endfile_is_refused_on_a_read_only_unit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        std::fs::write(&path, b"one\n").unwrap();
        let mut unit = ExternalFileUnit::new(34);
        unit.access = Access::Sequential;
        unit.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        unit.open_unit(
            Some(OpenStatus::Old),
            Some(Action::Read),
            Position::Rewind,
            Some(path),
            Convert::Unknown,
            &mut handler,
        );
        assert!(!handler.in_error());
        let mut handler = IoErrorHandler::new();
        unit.endfile(&mut handler);
        assert_eq!(handler.io_stat(), IoStat::EndfileUnwritable);
    }
}

mod append {
    use super::*;

    #[test]
    fn append_position_writes_after_existing_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        std::fs::write(&path, b"old\n").unwrap();
        let mut unit = ExternalFileUnit::new(35);
        unit.access = Access::Sequential;
        unit.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        unit.open_unit(
            Some(OpenStatus::Old),
            Some(Action::ReadWrite),
            Position::Append,
            Some(path.clone()),
            Convert::Unknown,
            &mut handler,
        );
        assert!(!handler.in_error(), "{:?}", handler.message());
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        write_record(&mut unit, b"new");
        let mut handler = IoErrorHandler::new();
        unit.close_unit(recio::CloseStatus::Keep, &mut handler);
        assert_eq!(std::fs::read(&path).unwrap(), b"old\nnew\n");
    }
}
