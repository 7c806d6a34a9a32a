//! # Registry and Unit Lifecycle Tests
//!
//! The process-wide registry: predefined units, anonymous `fort.N`
//! connections, the path index (`OpenAlreadyConnected`), and the
//! connected-unit re-open matrix.
//!
//! These tests share one process-global registry, so they serialize on a
//! file-local lock and use distinct unit numbers.

use std::path::PathBuf;

use parking_lot::Mutex;
use recio::{
    registry, Access, Action, CloseStatus, Convert, Direction, IoErrorHandler, IoStat, OpenStatus,
    Position,
};
use tempfile::tempdir;

static REGISTRY_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn predefined_units_are_connected_and_formatted() {
    let _serial = REGISTRY_LOCK.lock();
    for (number, direction) in [
        (registry::DEFAULT_OUTPUT_UNIT, Direction::Output),
        (registry::DEFAULT_INPUT_UNIT, Direction::Input),
        (registry::ERROR_OUTPUT_UNIT, Direction::Output),
    ] {
        let unit = registry::lookup(number).expect("predefined unit");
        let unit = unit.lock();
        assert!(unit.is_connected());
        assert_eq!(unit.direction(), direction);
        assert_eq!(unit.is_unformatted, Some(false));
    }
}

#[test]
fn anonymous_unit_writes_then_reads_fort_n() {
    let _serial = REGISTRY_LOCK.lock();
    let dir = tempdir().unwrap();
    let original_dir = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    {
        let unit = registry::lookup_or_create_anonymous(7, Direction::Output, Some(false));
        let mut unit = unit.lock();
        assert_eq!(unit.path(), Some(PathBuf::from("fort.7").as_path()));
        assert_eq!(unit.set_direction(Direction::Output), IoStat::Ok);
        let mut handler = IoErrorHandler::new();
        assert!(unit.emit(b"Hi", 1, &mut handler));
        assert!(unit.advance_record(&mut handler));
        unit.close_unit(CloseStatus::Keep, &mut handler);
        assert!(!handler.in_error(), "{:?}", handler.message());
    }
    registry::destroy_closed(7);
    assert!(dir.path().join("fort.7").exists());

    {
        let unit = registry::lookup_or_create_anonymous(7, Direction::Input, Some(false));
        let mut unit = unit.lock();
        assert_eq!(unit.set_direction(Direction::Input), IoStat::Ok);
        let mut handler = IoErrorHandler::new();
        assert!(unit.begin_reading_record(&mut handler), "{:?}", handler.message());
        assert_eq!(unit.record_length, Some(2));
        let mut data = [0u8; 2];
        assert!(unit.receive(&mut data, 1, &mut handler));
        assert_eq!(&data, b"Hi");
        let mut handler = IoErrorHandler::new();
        unit.close_unit(CloseStatus::Keep, &mut handler);
    }
    registry::destroy_closed(7);

    std::env::set_current_dir(original_dir).unwrap();
}

#[test]
fn opening_a_path_held_by_another_unit_is_refused() {
    let _serial = REGISTRY_LOCK.lock();
    let dir = tempdir().unwrap();
    let path = dir.path().join("shared.txt");

    let (first, _) = registry::lookup_or_create(11);
    {
        let mut unit = first.lock();
        unit.access = Access::Sequential;
        unit.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        unit.open_unit(
            Some(OpenStatus::Unknown),
            Some(Action::ReadWrite),
            Position::Rewind,
            Some(path.clone()),
            Convert::Unknown,
            &mut handler,
        );
        assert!(!handler.in_error(), "{:?}", handler.message());
    }

    let (second, _) = registry::lookup_or_create(12);
    {
        let mut unit = second.lock();
        unit.access = Access::Sequential;
        unit.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        unit.open_unit(
            Some(OpenStatus::Unknown),
            Some(Action::ReadWrite),
            Position::Rewind,
            Some(path.clone()),
            Convert::Unknown,
            &mut handler,
        );
        assert_eq!(handler.io_stat(), IoStat::OpenAlreadyConnected);
        assert!(handler.message().unwrap().contains("unit 11"));
        assert!(!unit.is_connected());
    }
    assert!(first.lock().is_connected());

    let mut handler = IoErrorHandler::new();
    first.lock().close_unit(CloseStatus::Keep, &mut handler);
    registry::destroy_closed(11);
    registry::destroy_closed(12);
}

#[test]
fn a_closed_paths_registration_is_released() {
    let _serial = REGISTRY_LOCK.lock();
    let dir = tempdir().unwrap();
    let path = dir.path().join("recycled.txt");

    let (first, _) = registry::lookup_or_create(13);
    {
        let mut unit = first.lock();
        unit.access = Access::Sequential;
        unit.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        unit.open_unit(
            Some(OpenStatus::Unknown),
            Some(Action::ReadWrite),
            Position::Rewind,
            Some(path.clone()),
            Convert::Unknown,
            &mut handler,
        );
        assert!(!handler.in_error());
        unit.close_unit(CloseStatus::Keep, &mut handler);
    }

    let (second, _) = registry::lookup_or_create(14);
    {
        let mut unit = second.lock();
        unit.access = Access::Sequential;
        unit.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        unit.open_unit(
            Some(OpenStatus::Unknown),
            Some(Action::ReadWrite),
            Position::Rewind,
            Some(path.clone()),
            Convert::Unknown,
            &mut handler,
        );
        assert!(!handler.in_error(), "{:?}", handler.message());
        unit.close_unit(CloseStatus::Keep, &mut handler);
    }
    registry::destroy_closed(13);
    registry::destroy_closed(14);
}

#[test]
fn reopening_the_same_path_keeps_the_connection() {
    let _serial = REGISTRY_LOCK.lock();
    let dir = tempdir().unwrap();
    let path = dir.path().join("same.txt");

    let (unit_ref, _) = registry::lookup_or_create(15);
    let mut unit = unit_ref.lock();
    unit.access = Access::Sequential;
    unit.is_unformatted = Some(false);
    let mut handler = IoErrorHandler::new();
    unit.open_unit(
        Some(OpenStatus::Unknown),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.clone()),
        Convert::Unknown,
        &mut handler,
    );
    assert!(!handler.in_error());

    // Same path, STATUS= unset: the connection is kept.
    let implied_close = unit.open_unit(
        None,
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.clone()),
        Convert::Unknown,
        &mut handler,
    );
    assert!(!implied_close);
    assert!(!handler.in_error());
    assert!(unit.is_connected());

    // Same path, explicit STATUS= other than OLD: an error.
    let mut handler = IoErrorHandler::new();
    unit.open_unit(
        Some(OpenStatus::Replace),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.clone()),
        Convert::Unknown,
        &mut handler,
    );
    assert!(handler.in_error());
    assert!(handler.message().unwrap().contains("STATUS="));

    let mut handler = IoErrorHandler::new();
    unit.close_unit(CloseStatus::Keep, &mut handler);
    drop(unit);
    registry::destroy_closed(15);
}

#[test]
fn reopening_with_a_new_path_implies_a_close() {
    let _serial = REGISTRY_LOCK.lock();
    let dir = tempdir().unwrap();
    let first_path = dir.path().join("first.txt");
    let second_path = dir.path().join("second.txt");

    let (unit_ref, _) = registry::lookup_or_create(16);
    let mut unit = unit_ref.lock();
    unit.access = Access::Sequential;
    unit.is_unformatted = Some(false);
    let mut handler = IoErrorHandler::new();
    unit.open_unit(
        Some(OpenStatus::Unknown),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(first_path.clone()),
        Convert::Unknown,
        &mut handler,
    );
    assert!(!handler.in_error());

    let implied_close = unit.open_unit(
        Some(OpenStatus::Unknown),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(second_path.clone()),
        Convert::Unknown,
        &mut handler,
    );
    assert!(implied_close);
    assert!(!handler.in_error(), "{:?}", handler.message());
    assert_eq!(unit.path(), Some(second_path.as_path()));

    // The first path is free again for another unit.
    let (other_ref, _) = registry::lookup_or_create(17);
    {
        let mut other = other_ref.lock();
        other.access = Access::Sequential;
        other.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        other.open_unit(
            Some(OpenStatus::Old),
            Some(Action::ReadWrite),
            Position::Rewind,
            Some(first_path.clone()),
            Convert::Unknown,
            &mut handler,
        );
        assert!(!handler.in_error(), "{:?}", handler.message());
        other.close_unit(CloseStatus::Keep, &mut handler);
    }

    let mut handler = IoErrorHandler::new();
    unit.close_unit(CloseStatus::Keep, &mut handler);
    drop(unit);
    registry::destroy_closed(16);
    registry::destroy_closed(17);
}

#[test]
fn close_with_delete_removes_the_file() {
    let _serial = REGISTRY_LOCK.lock();
    let dir = tempdir().unwrap();
    let path = dir.path().join("doomed.txt");

    let (unit_ref, _) = registry::lookup_or_create(18);
    {
        let mut unit = unit_ref.lock();
        unit.access = Access::Sequential;
        unit.is_unformatted = Some(false);
        let mut handler = IoErrorHandler::new();
        unit.open_unit(
            Some(OpenStatus::Unknown),
            Some(Action::ReadWrite),
            Position::Rewind,
            Some(path.clone()),
            Convert::Unknown,
            &mut handler,
        );
        assert!(!handler.in_error());
        assert!(path.exists());
        unit.close_unit(CloseStatus::Delete, &mut handler);
        assert!(!handler.in_error());
    }
    assert!(!path.exists());
    registry::destroy_closed(18);
}

#[test]
fn flush_all_touches_every_unit_without_failing() {
    let _serial = REGISTRY_LOCK.lock();
    let mut handler = IoErrorHandler::new();
    registry::flush_all(&mut handler);
    assert!(!handler.in_error());
    registry::flush_output_on_crash();
}
