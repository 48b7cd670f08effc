//! Delta computation against the store

use crate::error::SyncError;
use crate::evidence::{SourceSystem, WorkItemReference};
use crate::storage::Database;

/// References still to process, plus how many were already stored
#[derive(Debug, Clone)]
pub struct Delta {
    pub items: Vec<WorkItemReference>,
    pub existing: usize,
}

/// Split `discovered` into what needs processing.
///
/// One batched existence lookup decides which identifiers are already
/// stored. With `update_existing` every discovered reference is kept. A
/// `cap` is re-applied to the result.
pub fn compute_delta(
    db: &Database,
    system: SourceSystem,
    discovered: Vec<WorkItemReference>,
    update_existing: bool,
    cap: Option<usize>,
) -> Result<Delta, SyncError> {
    let identifiers: Vec<String> = discovered.iter().map(|r| r.identifier.clone()).collect();
    let stored = db
        .existing_identifiers(system, &identifiers)
        .map_err(SyncError::persistence)?;

    let existing = discovered
        .iter()
        .filter(|r| stored.contains(&r.identifier))
        .count();

    let mut items: Vec<WorkItemReference> = if update_existing {
        discovered
    } else {
        discovered
            .into_iter()
            .filter(|r| !stored.contains(&r.identifier))
            .collect()
    };

    if let Some(cap) = cap {
        items.truncate(cap);
    }

    Ok(Delta { items, existing })
}
