//! Sequential ID allocation for new tasks and subtasks.
//!
//! IDs are handed out in one contiguous run per batch:
//! 1. Without a seed, the run starts at `max(existing) + 1`
//! 2. With a seed, the run starts exactly at the seed
//! 3. A seeded run that overlaps an existing ID is refused, never shifted
//! 4. A run that would pass `u32::MAX` is refused

use crate::reconcile::MergeFailure;
use std::collections::BTreeSet;

/// Allocate `count` sequential IDs that do not collide with `existing`.
///
/// # Errors
///
/// Returns [`MergeFailure::IdSeedConflict`] if a supplied seed is zero, the
/// seeded range overlaps an existing ID, or the run does not fit in `u32`.
pub fn allocate(
    existing: &BTreeSet<u32>,
    seed: Option<u32>,
    count: usize,
) -> Result<Vec<u32>, MergeFailure> {
    let start = match seed {
        Some(seed) => seed,
        None => next_id(existing)?,
    };
    if start == 0 {
        return Err(MergeFailure::IdSeedConflict { seed: 0, conflicting: vec![0] });
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let last = u32::try_from(count - 1).ok().and_then(|n| start.checked_add(n));
    let Some(last) = last else {
        return Err(MergeFailure::IdSeedConflict { seed: start, conflicting: vec![] });
    };

    let conflicting: Vec<u32> = existing.range(start..=last).copied().collect();
    if !conflicting.is_empty() {
        return Err(MergeFailure::IdSeedConflict { seed: start, conflicting });
    }

    Ok((start..=last).collect())
}

/// The next free ID after the current maximum.
///
/// # Errors
///
/// Returns [`MergeFailure::IdSeedConflict`] if the maximum is already
/// `u32::MAX`.
pub fn next_id(existing: &BTreeSet<u32>) -> Result<u32, MergeFailure> {
    match existing.last() {
        None => Ok(1),
        Some(&max) => max
            .checked_add(1)
            .ok_or(MergeFailure::IdSeedConflict { seed: max, conflicting: vec![max] }),
    }
}
