//! Next-class selection.
//!
//! A pure function over the size table: given the current class and the
//! pressure signal, decide where the instance moves. No I/O, no logging
//! of its own; callers log the decision.

use crate::error::CoreResult;
use crate::size_table::{SizeTable, Step};
use crate::types::{InstanceClass, PressureSignal};

/// Outcome of a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextClass {
    /// Resize to this class.
    Resize(InstanceClass),
    /// The ladder has no step in this direction.
    NoAction,
    /// Scaling in this direction is switched off in the table.
    Disabled,
}

/// Select the next class for `current` under `signal`.
///
/// The direction flag is checked first, so a disabled direction yields
/// `Disabled` even for classes the table does not know. An unknown class
/// with an enabled direction is a configuration error.
pub fn select_next_class(
    current: &str,
    signal: PressureSignal,
    table: &SizeTable,
) -> CoreResult<NextClass> {
    if !table.is_enabled(signal.direction()) {
        return Ok(NextClass::Disabled);
    }
    Ok(match table.step(current, signal)? {
        Step::To(class) => NextClass::Resize(class.clone()),
        Step::NoAction => NextClass::NoAction,
    })
}
