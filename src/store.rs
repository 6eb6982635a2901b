//! Config store: staged blocks, assembled snapshots, last-known-good
//!
//! The store holds an in-memory working set of [`ConfigBlock`]s keyed by
//! campaign name. `stage`/`retract` never touch the committed state;
//! `assemble` produces an immutable [`ConfigSnapshot`] and `commit` swaps
//! it in as current. A snapshot is only ever committed after it passed
//! validation and a live reload, so the current snapshot is by
//! construction last-known-good and `rollback` hands it back for
//! re-application.

use crate::error::{ReloadError, SynthesisError};
use crate::synth::ConfigBlock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Static boilerplate prepended to every assembled config
const HEADER: &str = "\
# Campaign location blocks managed by zerotouch.
# Do not edit by hand; this file is rewritten on every scan cycle.
";

/// The fully assembled proxy configuration at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    /// Monotonically increasing version number
    pub version: u64,
    /// Assembled configuration text
    pub text: String,
    /// Number of campaign blocks included
    pub block_count: usize,
    pub assembled_at: DateTime<Utc>,
}

/// Result of staging a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Identical content hash already staged; not a reload trigger
    Unchanged,
    Added,
    Replaced,
}

/// Owns the working set and the current / last-known-good snapshots
#[derive(Clone)]
pub struct ConfigStore {
    working: BTreeMap<String, ConfigBlock>,
    current: Option<ConfigSnapshot>,
    next_version: u64,
    dirty: bool,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            working: BTreeMap::new(),
            current: None,
            next_version: 1,
            dirty: false,
        }
    }

    /// Stage a block into the working set.
    ///
    /// Rejects a block whose location path is already owned by a different
    /// campaign name; sanitization collisions are a hard error, never
    /// silently disambiguated.
    pub fn stage(&mut self, block: ConfigBlock) -> Result<StageOutcome, SynthesisError> {
        if let Some(existing) = self
            .working
            .values()
            .find(|b| b.location == block.location && b.campaign != block.campaign)
        {
            return Err(SynthesisError::LocationCollision {
                campaign: block.campaign.clone(),
                existing: existing.campaign.clone(),
                location: block.location.clone(),
            });
        }

        match self.working.get(&block.campaign) {
            Some(prev) if prev.content_hash == block.content_hash => Ok(StageOutcome::Unchanged),
            Some(_) => {
                self.working.insert(block.campaign.clone(), block);
                self.dirty = true;
                Ok(StageOutcome::Replaced)
            }
            None => {
                self.working.insert(block.campaign.clone(), block);
                self.dirty = true;
                Ok(StageOutcome::Added)
            }
        }
    }

    /// Remove a campaign's block from the working set. Returns whether a
    /// block was present.
    pub fn retract(&mut self, name: &str) -> bool {
        let removed = self.working.remove(name).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// True when the working set diverged from the committed snapshot
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Assemble the working set into a new snapshot. Blocks are ordered by
    /// campaign name, so the output is independent of scan order.
    pub fn assemble(&mut self) -> ConfigSnapshot {
        let mut text = String::from(HEADER);
        for block in self.working.values() {
            text.push('\n');
            text.push_str(&block.text);
        }

        let snapshot = ConfigSnapshot {
            version: self.next_version,
            text,
            block_count: self.working.len(),
            assembled_at: Utc::now(),
        };
        self.next_version += 1;
        snapshot
    }

    /// Install a snapshot as current after a successful validation and
    /// reload; anything older is discarded.
    pub fn commit(&mut self, snapshot: ConfigSnapshot) {
        self.current = Some(snapshot);
        self.dirty = false;
    }

    /// The snapshot to restore after a failed reload. A failed snapshot is
    /// never committed, so current is the last one that passed validation
    /// and reload. The working set stays dirty, leaving the failed changes
    /// to be retried next cycle.
    pub fn rollback(&mut self) -> Result<ConfigSnapshot, ReloadError> {
        self.current.clone().ok_or(ReloadError::NoLastKnownGood)
    }

    pub fn current(&self) -> Option<&ConfigSnapshot> {
        self.current.as_ref()
    }

    /// Blocks in the working set, in stable name order
    pub fn blocks(&self) -> impl Iterator<Item = &ConfigBlock> {
        self.working.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.working.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
