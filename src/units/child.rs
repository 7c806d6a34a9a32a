//! # Child I/O Stack
//!
//! A defined-I/O callee does its transfers *inside* a statement already
//! in progress on the unit. Each nesting level is a `ChildIo` frame
//! capturing the parent statement's direction and formatting mode; the
//! frames form an owned stack on the unit. Before a child transfer
//! starts, its mode is checked against the parent's; the four mismatch
//! codes are the only faults this layer produces.
//!
//! Popping a frame that is not the top of the stack is a caller bug and
//! crashes rather than signaling.

use crate::error::{IoErrorHandler, IoStat};
use crate::types::Direction;

/// One nesting level of defined I/O on a unit.
#[derive(Debug, Clone, Copy)]
pub struct ChildIo {
    parent_direction: Direction,
    parent_unformatted: bool,
}

impl ChildIo {
    pub(crate) fn new(parent_direction: Direction, parent_unformatted: bool) -> Self {
        Self {
            parent_direction,
            parent_unformatted,
        }
    }

    pub fn parent_direction(&self) -> Direction {
        self.parent_direction
    }

    pub fn parent_is_unformatted(&self) -> bool {
        self.parent_unformatted
    }

    /// Checks a child transfer's mode against the parent statement's.
    pub fn check_formatting_and_direction(
        &self,
        unformatted: bool,
        direction: Direction,
    ) -> IoStat {
        if unformatted != self.parent_unformatted {
            if unformatted {
                IoStat::UnformattedChildOnFormattedParent
            } else {
                IoStat::FormattedChildOnUnformattedParent
            }
        } else if (self.parent_direction == Direction::Input) != (direction == Direction::Input) {
            if self.parent_direction == Direction::Input {
                IoStat::ChildOutputToInputParent
            } else {
                IoStat::ChildInputFromOutputParent
            }
        } else {
            IoStat::Ok
        }
    }
}

impl super::ExternalFileUnit {
    /// Pushes a child frame for a nested transfer and returns its depth
    /// token, which must be handed back to [`Self::pop_child_io`].
    pub fn push_child_io(&mut self, parent_direction: Direction, parent_unformatted: bool) -> usize {
        self.children
            .push(ChildIo::new(parent_direction, parent_unformatted));
        self.children.len()
    }

    /// Pops the top child frame. Crashes if `depth` is not the top.
    pub fn pop_child_io(&mut self, depth: usize, handler: &IoErrorHandler) {
        if self.children.len() != depth || depth == 0 {
            handler.crash("child I/O being popped is not the top of the stack");
        }
        self.children.pop();
    }

    /// The innermost child frame, if a nested transfer is in progress.
    pub fn child_io(&self) -> Option<&ChildIo> {
        self.children.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::ExternalFileUnit;

    #[test]
    fn matching_modes_pass() {
        let child = ChildIo::new(Direction::Output, false);
        assert_eq!(
            child.check_formatting_and_direction(false, Direction::Output),
            IoStat::Ok
        );
    }

    #[test]
    fn formatting_mismatches_name_the_offender() {
        let formatted_parent = ChildIo::new(Direction::Output, false);
        assert_eq!(
            formatted_parent.check_formatting_and_direction(true, Direction::Output),
            IoStat::UnformattedChildOnFormattedParent
        );
        let unformatted_parent = ChildIo::new(Direction::Input, true);
        assert_eq!(
            unformatted_parent.check_formatting_and_direction(false, Direction::Input),
            IoStat::FormattedChildOnUnformattedParent
        );
    }

    #[test]
    fn direction_mismatches_name_the_parent_side() {
        let input_parent = ChildIo::new(Direction::Input, true);
        assert_eq!(
            input_parent.check_formatting_and_direction(true, Direction::Output),
            IoStat::ChildOutputToInputParent
        );
        let output_parent = ChildIo::new(Direction::Output, true);
        assert_eq!(
            output_parent.check_formatting_and_direction(true, Direction::Input),
            IoStat::ChildInputFromOutputParent
        );
    }

    #[test]
    fn push_and_pop_nest_properly() {
        let mut unit = ExternalFileUnit::new(30);
        let handler = IoErrorHandler::new();
        let first = unit.push_child_io(Direction::Output, false);
        let second = unit.push_child_io(Direction::Output, false);
        assert!(unit.child_io().is_some());
        unit.pop_child_io(second, &handler);
        unit.pop_child_io(first, &handler);
        assert!(unit.child_io().is_none());
    }

    #[test]
    #[should_panic(expected = "not the top")]
    fn popping_a_non_top_frame_crashes() {
        let mut unit = ExternalFileUnit::new(31);
        let handler = IoErrorHandler::new();
        let first = unit.push_child_io(Direction::Input, false);
        let _second = unit.push_child_io(Direction::Input, false);
        unit.pop_child_io(first, &handler);
    }
}
