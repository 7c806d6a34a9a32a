//! # Process-Wide Unit Registry
//!
//! The registry maps unit numbers to live units and file paths to the
//! unit currently connected to them. It is created lazily the first time
//! any unit is touched, so record I/O works without explicit runtime
//! initialization, and it registers a process-exit hook that closes every
//! unit, a back-stop for programs that terminate without an orderly
//! shutdown.
//!
//! ## Predefined Units
//!
//! Bootstrap creates three formatted units bound to dup'ed standard
//! descriptors before anything else can be looked up:
//!
//! | Unit | Descriptor | Direction |
//! |------|------------|-----------|
//! | 6 | stdout (1) | Output |
//! | 5 | stdin (0) | Input |
//! | 0 | stderr (2) | Output |
//!
//! Handles to the three are cached beside the map so the crash-flush path
//! and the flush-before-stdin-read path reach them without a map search.
//!
//! ## Locking
//!
//! The registry mutex protects the map itself; it is never held while a
//! unit's own mutex is taken. `close_all`/`flush_all` therefore clone the
//! handles out first and lock each unit afterwards: everywhere else in
//! the engine the order is unit first, registry second, and taking both
//! in the reverse order would deadlock against a statement in flight.
//! A separate create-open lock serializes the compound "look up or create,
//! then open" of anonymous units so two concurrent first touches of the
//! same unit cannot race between creation and the first open.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::{ExternalFileUnit, UnitRef};
use crate::error::IoErrorHandler;
use crate::types::{Action, CloseStatus, Convert, Direction, OpenStatus, Position};

pub const ERROR_OUTPUT_UNIT: i32 = 0;
pub const DEFAULT_INPUT_UNIT: i32 = 5;
pub const DEFAULT_OUTPUT_UNIT: i32 = 6;

/// `NEWUNIT=`-style numbers count down from here; they can never collide
/// with the predefined units or with plausible user unit numbers.
const NEW_UNIT_START: i32 = -101;

static UNIT_MAP: Mutex<Option<UnitMap>> = Mutex::new(None);
static CREATE_OPEN_LOCK: Mutex<()> = Mutex::new(());
static DEFAULT_INPUT: Mutex<Option<UnitRef>> = Mutex::new(None);
static DEFAULT_OUTPUT: Mutex<Option<UnitRef>> = Mutex::new(None);
static ERROR_OUTPUT: Mutex<Option<UnitRef>> = Mutex::new(None);

#[derive(Debug)]
struct UnitMap {
    units: HashMap<i32, UnitRef>,
    by_path: HashMap<PathBuf, i32>,
    next_new_unit: i32,
}

impl UnitMap {
    fn create(&mut self, unit_number: i32) -> UnitRef {
        let unit = Arc::new(Mutex::new(ExternalFileUnit::new(unit_number)));
        self.units.insert(unit_number, unit.clone());
        unit
    }

    fn lookup_or_create(&mut self, unit_number: i32) -> (UnitRef, bool) {
        match self.units.get(&unit_number) {
            Some(unit) => (unit.clone(), true),
            None => (self.create(unit_number), false),
        }
    }
}

fn create_unit_map() -> UnitMap {
    let mut map = UnitMap {
        units: HashMap::new(),
        by_path: HashMap::new(),
        next_new_unit: NEW_UNIT_START,
    };

    let output = map.create(DEFAULT_OUTPUT_UNIT);
    {
        let mut unit = output.lock();
        unit.predefine(1);
        let stat = unit.set_direction(Direction::Output);
        debug_assert_eq!(stat, crate::error::IoStat::Ok);
        unit.is_unformatted = Some(false);
    }
    *DEFAULT_OUTPUT.lock() = Some(output);

    let input = map.create(DEFAULT_INPUT_UNIT);
    {
        let mut unit = input.lock();
        unit.predefine(0);
        let stat = unit.set_direction(Direction::Input);
        debug_assert_eq!(stat, crate::error::IoStat::Ok);
        unit.is_unformatted = Some(false);
    }
    *DEFAULT_INPUT.lock() = Some(input);

    let error = map.create(ERROR_OUTPUT_UNIT);
    {
        let mut unit = error.lock();
        unit.predefine(2);
        let stat = unit.set_direction(Direction::Output);
        debug_assert_eq!(stat, crate::error::IoStat::Ok);
        unit.is_unformatted = Some(false);
    }
    *ERROR_OUTPUT.lock() = Some(error);

    debug!("unit registry bootstrapped with predefined units 0, 5, 6");
    map
}

extern "C" {
    fn atexit(callback: extern "C" fn()) -> libc::c_int;
}

extern "C" fn close_all_units_at_exit() {
    let mut handler = IoErrorHandler::new();
    close_all(&mut handler);
}

fn register_exit_flush() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| unsafe {
        atexit(close_all_units_at_exit);
    });
}

/// Runs `f` on the registry, bootstrapping it first if necessary. The
/// slot is re-tested under the lock, so concurrent first touches create
/// the predefined units exactly once.
fn with_unit_map<R>(f: impl FnOnce(&mut UnitMap) -> R) -> R {
    let mut guard = UNIT_MAP.lock();
    let bootstrapped = guard.is_none();
    let result = f(guard.get_or_insert_with(create_unit_map));
    drop(guard);
    if bootstrapped {
        register_exit_flush();
    }
    result
}

/// Runs `f` on the registry only if it already exists; never bootstraps.
fn with_existing_map<R>(f: impl FnOnce(&mut UnitMap) -> R) -> Option<R> {
    UNIT_MAP.lock().as_mut().map(f)
}

/// The unit connected as `unit_number`, if any.
pub fn lookup(unit_number: i32) -> Option<UnitRef> {
    with_unit_map(|map| map.units.get(&unit_number).cloned())
}

/// The unit currently connected to `path`, if any.
pub fn lookup_by_path(path: &Path) -> Option<UnitRef> {
    with_unit_map(|map| {
        map.by_path
            .get(path)
            .and_then(|number| map.units.get(number))
            .cloned()
    })
}

/// The unit a `CLOSE` statement should address, if it exists.
pub fn lookup_for_close(unit_number: i32) -> Option<UnitRef> {
    lookup(unit_number)
}

/// Looks the unit up, creating it if absent. The boolean reports whether
/// it already existed.
pub fn lookup_or_create(unit_number: i32) -> (UnitRef, bool) {
    with_unit_map(|map| map.lookup_or_create(unit_number))
}

/// Creates a unit that must not already exist. Crashes if it does.
pub fn create_new(unit_number: i32) -> UnitRef {
    let (unit, extant) = lookup_or_create(unit_number);
    if extant {
        IoErrorHandler::new().crash(format!("unit {} already exists", unit_number));
    }
    unit
}

/// Looks up or creates `unit_number` and, if it was just created, opens
/// it on its default local file `fort.N` with direction-appropriate
/// dispositions and the caller's formatting hint.
///
/// The whole compound runs under the create-open lock so a concurrent
/// caller cannot observe the unit created but not yet opened.
pub fn lookup_or_create_anonymous(
    unit_number: i32,
    direction: Direction,
    is_unformatted: Option<bool>,
) -> UnitRef {
    let _guard = CREATE_OPEN_LOCK.lock();
    let (unit_ref, extant) = lookup_or_create(unit_number);
    if !extant {
        let mut handler = IoErrorHandler::new();
        let mut unit = unit_ref.lock();
        let status = if direction == Direction::Input {
            OpenStatus::Unknown
        } else {
            OpenStatus::Replace
        };
        unit.open_anonymous_unit(
            Some(status),
            Some(Action::ReadWrite),
            Position::Rewind,
            Convert::Unknown,
            &mut handler,
        );
        unit.is_unformatted = is_unformatted;
    }
    unit_ref
}

/// Allocates a fresh unit with a number distinct from every existing and
/// predefined one.
pub fn new_unit(for_child_io: bool) -> UnitRef {
    with_unit_map(|map| {
        let mut number = map.next_new_unit;
        while map.units.contains_key(&number) {
            number -= 1;
        }
        map.next_new_unit = number - 1;
        let unit = map.create(number);
        unit.lock().created_for_internal_child_io = for_child_io;
        unit
    })
}

/// Removes a closed unit from the registry. The unit object itself lives
/// on while anyone still holds a handle.
pub fn destroy_closed(unit_number: i32) {
    with_existing_map(|map| {
        map.units.remove(&unit_number);
        map.by_path.retain(|_, number| *number != unit_number);
    });
}

/// Closes every unit and tears the registry down. Registered as the
/// process-exit hook; also callable for an orderly shutdown.
pub fn close_all(handler: &mut IoErrorHandler) {
    let map = UNIT_MAP.lock().take();
    *DEFAULT_INPUT.lock() = None;
    *DEFAULT_OUTPUT.lock() = None;
    *ERROR_OUTPUT.lock() = None;
    if let Some(map) = map {
        for (_, unit) in map.units {
            unit.lock().close_unit(CloseStatus::Keep, handler);
        }
    }
}

/// Flushes every unit without closing anything.
pub fn flush_all(handler: &mut IoErrorHandler) {
    let units: Vec<UnitRef> = match &*UNIT_MAP.lock() {
        Some(map) => map.units.values().cloned().collect(),
        None => return,
    };
    for unit in units {
        unit.lock().flush_output(handler);
    }
}

/// Flushes the default output and error units with a fresh handler.
///
/// Called before reading the default input, so prompts written to units
/// 6 and 0 appear before the program blocks on stdin.
pub(crate) fn flush_default_outputs() {
    let output = DEFAULT_OUTPUT.lock().clone();
    let error = ERROR_OUTPUT.lock().clone();
    let mut handler = IoErrorHandler::new();
    if let Some(unit) = output {
        unit.lock().flush_output(&mut handler);
    }
    if let Some(unit) = error {
        unit.lock().flush_output(&mut handler);
    }
}

/// Last-gasp flush of the default output units during abnormal
/// termination. Nested faults land on a private handler and are never
/// escalated, so a broken descriptor cannot recurse into another crash.
pub fn flush_output_on_crash() {
    if DEFAULT_OUTPUT.lock().is_none() && ERROR_OUTPUT.lock().is_none() {
        return;
    }
    flush_default_outputs();
}

/// Whether `unit_number` is the predefined default input.
pub(crate) fn is_default_input(unit_number: i32) -> bool {
    unit_number == DEFAULT_INPUT_UNIT
}

/// The unit number currently holding `path`, if any. Never bootstraps.
pub(crate) fn path_holder(path: &Path) -> Option<i32> {
    with_existing_map(|map| map.by_path.get(path).copied()).flatten()
}

/// Records that `unit_number` now holds `path`. Only units present in
/// the registry are indexed; standalone units stay invisible.
pub(crate) fn bind_path(path: PathBuf, unit_number: i32) {
    with_existing_map(|map| {
        if map.units.contains_key(&unit_number) {
            map.by_path.insert(path, unit_number);
        }
    });
}

/// Drops the path index entry for `path`, if any.
pub(crate) fn unbind_path(path: &Path) {
    with_existing_map(|map| {
        map.by_path.remove(path);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_the_predefined_units() {
        let output = lookup(DEFAULT_OUTPUT_UNIT).expect("unit 6");
        let input = lookup(DEFAULT_INPUT_UNIT).expect("unit 5");
        let error = lookup(ERROR_OUTPUT_UNIT).expect("unit 0");
        assert_eq!(output.lock().direction(), Direction::Output);
        assert_eq!(input.lock().direction(), Direction::Input);
        assert_eq!(error.lock().direction(), Direction::Output);
        assert_eq!(output.lock().is_unformatted, Some(false));
        assert!(output.lock().is_connected());
    }

    #[test]
    fn lookup_or_create_reports_extancy() {
        let (first, extant_first) = lookup_or_create(1234);
        assert!(!extant_first);
        let (second, extant_second) = lookup_or_create(1234);
        assert!(extant_second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn new_units_get_fresh_negative_numbers() {
        let first = new_unit(false);
        let second = new_unit(true);
        let first_number = first.lock().unit_number();
        let second_number = second.lock().unit_number();
        assert!(first_number < 0);
        assert!(second_number < 0);
        assert_ne!(first_number, second_number);
        assert!(second.lock().created_for_internal_child_io());
        assert!(!first.lock().created_for_internal_child_io());
    }

    #[test]
    fn destroy_closed_removes_the_registration() {
        let (_, _) = lookup_or_create(4321);
        destroy_closed(4321);
        let (_, extant) = lookup_or_create(4321);
        assert!(!extant);
        destroy_closed(4321);
    }
}
