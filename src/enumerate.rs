//! Two-phase enumeration of a compiled rule's children.
//!
//! The engine exposes tags, metadata records and strings through fill
//! primitives with one shape: given a destination of `N` slots, write at most
//! `N` children and return how many exist. Enumeration is a size query with
//! an empty destination followed by one fill into a host-owned buffer of
//! exactly that capacity.

use tracing::error;

use crate::types::{ChildKind, ContractViolation};

pub(crate) fn enumerate<'a, T, F>(
    kind: ChildKind,
    mut fill: F,
) -> Result<Vec<&'a T>, ContractViolation>
where
    T: ?Sized + 'a,
    F: FnMut(&mut [Option<&'a T>]) -> usize,
{
    let expected = fill(&mut []);
    if expected == 0 {
        return Ok(Vec::new());
    }

    // A boxed slice cannot grow or move while the fill writes into it.
    let mut slots: Box<[Option<&'a T>]> = vec![None; expected].into_boxed_slice();
    let actual = fill(&mut slots);
    if actual != expected {
        let violation = ContractViolation::CountMismatch {
            kind,
            expected,
            actual,
        };
        error!(%violation, "engine contract violated");
        return Err(violation);
    }

    slots
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                let violation = ContractViolation::UnfilledSlot { kind, index };
                error!(%violation, "engine contract violated");
                violation
            })
        })
        .collect()
}
