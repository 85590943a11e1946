use tracing::{debug, info};

use crate::{
    change::{AnyEntity, LocalChange},
    core::document::{Document, EntityStore, StoreError, apply_change, lookup},
    types::EntityKey,
};

use super::patch::{Direction, Patch, PatchSet};

/// Default number of patch sets kept.
pub const DEFAULT_MAX_PATCH_SETS: usize = 30;

/// Values of a batch's entities before the batch was written.
///
/// Built by [`HistoryEngine::capture`] and consumed by
/// [`HistoryEngine::record`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorValues {
    entries: Vec<(EntityKey, Option<AnyEntity>)>,
}

impl PriorValues {
    fn note<S: EntityStore>(&mut self, store: &S, key: EntityKey) {
        if self.entries.iter().any(|(k, _)| *k == key) {
            return;
        }
        let prior = lookup(store, &key);
        self.entries.push((key, prior));
    }

    /// Touched keys in first-touch order.
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// True when no entity was touched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of [`HistoryEngine::apply_and_record`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// Writes made, derived ones included.
    pub written: Vec<LocalChange>,
    /// Entities the batch addressed, in first-touch order.
    pub touched: Vec<EntityKey>,
    /// Whether a patch set was added.
    pub recorded: bool,
    /// The write that stopped the batch, if any.
    pub error: Option<StoreError>,
}

impl Applied {
    /// The writes, or the error that stopped the batch.
    pub fn into_result(self) -> Result<Vec<LocalChange>, StoreError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.written),
        }
    }
}

/// Linear undo/redo log over an [`EntityStore`].
///
/// `pointer` counts the patch sets currently applied. Undo replays
/// `patch_sets[pointer - 1]` backwards, redo replays `patch_sets[pointer]`
/// forwards. Recording after an undo discards everything from `pointer` on.
#[derive(Debug, Clone)]
pub struct HistoryEngine {
    patch_sets: Vec<PatchSet>,
    pointer: usize,
    is_paused: bool,
    snapshot: Option<Document>,
    max_patch_sets: usize,
}

impl Default for HistoryEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATCH_SETS)
    }
}

impl HistoryEngine {
    /// Empty log keeping at most `max_patch_sets` entries.
    pub fn new(max_patch_sets: usize) -> Self {
        Self {
            patch_sets: Vec::new(),
            pointer: 0,
            is_paused: false,
            snapshot: None,
            max_patch_sets: max_patch_sets.max(1),
        }
    }

    /// Number of patch sets currently applied.
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Number of patch sets held.
    pub fn len(&self) -> usize {
        self.patch_sets.len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.patch_sets.is_empty()
    }

    /// Recorded patch sets, oldest first.
    pub fn patch_sets(&self) -> &[PatchSet] {
        &self.patch_sets
    }

    /// True while paused for a gesture or a replay.
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    /// True while a pause snapshot is waiting for [`Self::resume`].
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// True when [`Self::undo`] would do something.
    pub fn can_undo(&self) -> bool {
        !self.is_paused && self.pointer > 0
    }

    /// True when [`Self::redo`] would do something.
    pub fn can_redo(&self) -> bool {
        !self.is_paused && self.pointer < self.patch_sets.len()
    }

    /// Stops recording and snapshots `store` so the gesture's patch set can
    /// diff against the state before it started. No-op when already paused.
    pub fn pause<S: EntityStore>(&mut self, store: &S) {
        if self.is_paused {
            return;
        }
        self.is_paused = true;
        self.snapshot = Some(store.snapshot());
        debug!("history paused");
    }

    /// Resumes recording and records one patch set for the entities in
    /// `touched`, diffing the pause snapshot against their current values.
    ///
    /// Returns whether a patch set was added.
    pub fn resume<S: EntityStore>(&mut self, store: &S, touched: &[EntityKey]) -> bool {
        if !self.is_paused {
            return false;
        }
        self.is_paused = false;
        let Some(snapshot) = self.snapshot.take() else {
            return false;
        };

        let mut seen: Vec<&EntityKey> = Vec::with_capacity(touched.len());
        let mut set = PatchSet::new();
        for key in touched {
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            if let Some(patch) = Patch::between(key, snapshot.get_any(key), lookup(store, key)) {
                set.push(patch);
            }
        }
        debug!(touched = touched.len(), patches = set.len(), "history resumed");
        self.push(set)
    }

    /// Drops every patch set and the snapshot.
    pub fn clear(&mut self) {
        self.patch_sets.clear();
        self.pointer = 0;
        self.is_paused = false;
        self.snapshot = None;
        info!("history cleared");
    }

    /// Captures the current values of the entities `changes` will write.
    /// Call before writing them.
    pub fn capture<S: EntityStore>(store: &S, changes: &[LocalChange]) -> PriorValues {
        let mut prior = PriorValues::default();
        for change in changes {
            prior.note(store, change.key());
        }
        prior
    }

    /// Records one patch set from `prior` and the values now in `store`.
    ///
    /// Entities whose history fields did not change are skipped; an empty
    /// patch set is not recorded. Returns whether a patch set was added.
    pub fn record<S: EntityStore>(&mut self, store: &S, prior: PriorValues) -> bool {
        if self.is_paused {
            return false;
        }
        let set: PatchSet = prior
            .entries
            .into_iter()
            .filter_map(|(key, before)| Patch::between(&key, before, lookup(store, &key)))
            .collect();
        self.push(set)
    }

    /// Writes `changes` to `store` in order and records them as one patch
    /// set.
    ///
    /// Stops at the first failing write; the writes before it stay applied
    /// and recorded. While paused nothing is recorded and the caller is
    /// expected to pass [`Applied::touched`] to [`Self::resume`] later.
    pub fn apply_and_record<S: EntityStore>(
        &mut self,
        store: &mut S,
        changes: &[LocalChange],
    ) -> Applied {
        let prior = Self::capture(store, changes);
        let mut applied = Applied {
            touched: prior.keys().cloned().collect(),
            ..Applied::default()
        };
        for change in changes {
            match apply_change(store, change) {
                Ok(out) => applied.written.extend(out),
                Err(err) => {
                    applied.error = Some(err);
                    break;
                }
            }
        }
        applied.recorded = self.record(store, prior);
        applied
    }

    /// Replays the patch set below the pointer backwards and moves the
    /// pointer down. No-op while paused or at the start.
    pub fn undo<S: EntityStore>(&mut self, store: &mut S) -> Vec<LocalChange> {
        if !self.can_undo() {
            return Vec::new();
        }
        let index = self.pointer - 1;
        let written = self.replay(store, index, Direction::Undo);
        self.pointer = index;
        debug!(pointer = self.pointer, total = self.patch_sets.len(), "undo");
        written
    }

    /// Replays the patch set at the pointer forwards and moves the pointer
    /// up. No-op while paused or at the end.
    pub fn redo<S: EntityStore>(&mut self, store: &mut S) -> Vec<LocalChange> {
        if !self.can_redo() {
            return Vec::new();
        }
        let index = self.pointer;
        let written = self.replay(store, index, Direction::Redo);
        self.pointer = index + 1;
        debug!(pointer = self.pointer, total = self.patch_sets.len(), "redo");
        written
    }

    /// Replays forwards every applied patch set without moving the pointer.
    ///
    /// Used after a freshly loaded copy of the space replaced the local one,
    /// to layer local edits back on top.
    pub fn reapply_local<S: EntityStore>(&mut self, store: &mut S) -> Vec<LocalChange> {
        let mut written = Vec::new();
        for index in 0..self.pointer {
            written.extend(self.replay(store, index, Direction::Redo));
        }
        if self.pointer > 0 {
            debug!(patch_sets = self.pointer, writes = written.len(), "reapplied local history");
        }
        written
    }

    fn replay<S: EntityStore>(
        &mut self,
        store: &mut S,
        index: usize,
        direction: Direction,
    ) -> Vec<LocalChange> {
        let was_paused = std::mem::replace(&mut self.is_paused, true);
        let mut written = Vec::new();
        if let Some(set) = self.patch_sets.get_mut(index) {
            for patch in set.iter_mut() {
                written.extend(patch.apply(store, direction));
            }
        }
        self.is_paused = was_paused;
        written
    }

    fn push(&mut self, set: PatchSet) -> bool {
        if set.is_empty() {
            return false;
        }
        self.patch_sets.truncate(self.pointer);
        debug!(
            actions = ?set.iter().map(|p| p.action().to_string()).collect::<Vec<_>>(),
            pointer = self.pointer + 1,
            "add history patch"
        );
        self.patch_sets.push(set);
        self.pointer = self.patch_sets.len();
        if self.patch_sets.len() > self.max_patch_sets {
            self.patch_sets.remove(0);
            self.pointer -= 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Card, CardPatch, Entity};

    fn card(id: &str, x: f64) -> Card {
        Card {
            id: id.to_string(),
            x,
            ..Card::default()
        }
    }

    fn move_to(id: &str, x: f64) -> LocalChange {
        LocalChange::update::<Card>(
            id,
            CardPatch {
                x: Some(x),
                ..CardPatch::default()
            },
        )
    }

    #[test]
    fn oldest_patch_set_is_evicted() {
        let mut doc = Document::from_entities([card("c", 0.0).into_any()]);
        let mut history = HistoryEngine::new(2);
        for x in 1..=3 {
            history
                .apply_and_record(&mut doc, &[move_to("c", x as f64)])
                .into_result()
                .expect("apply");
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.pointer(), 2);

        history.undo(&mut doc);
        history.undo(&mut doc);
        assert_eq!(doc.cards()["c"].x, 1.0);
        assert!(history.undo(&mut doc).is_empty());
    }

    #[test]
    fn paused_engine_neither_records_nor_replays() {
        let mut doc = Document::from_entities([card("c", 0.0).into_any()]);
        let mut history = HistoryEngine::default();
        history.apply_and_record(&mut doc, &[move_to("c", 1.0)]).into_result().expect("apply");

        history.pause(&doc);
        assert!(history.undo(&mut doc).is_empty());
        let applied = history.apply_and_record(&mut doc, &[move_to("c", 2.0)]);
        assert!(!applied.recorded);
        assert_eq!(applied.touched, vec![EntityKey::new(crate::types::EntityKind::Card, "c")]);
        assert_eq!(history.len(), 1);
        assert_eq!(doc.cards()["c"].x, 2.0);
    }

    #[test]
    fn derived_only_writes_are_not_recorded() {
        let mut doc = Document::from_entities([card("c", 0.0).into_any()]);
        let mut history = HistoryEngine::default();
        let resize = LocalChange::update::<Card>(
            "c",
            CardPatch {
                width: Some(300.0),
                height: Some(90.0),
                ..CardPatch::default()
            },
        );
        history.apply_and_record(&mut doc, &[resize]).into_result().expect("apply");
        assert!(history.is_empty());
    }

    #[test]
    fn unrecorded_writes_before_a_record_are_not_undone() {
        let mut doc = Document::from_entities([card("c", 0.0).into_any()]);
        let mut history = HistoryEngine::default();
        history.clear();
        // Written without recording, as a remote update would be.
        let theirs = LocalChange::update::<Card>(
            "c",
            CardPatch {
                name: Some("theirs".to_string()),
                ..CardPatch::default()
            },
        );
        apply_change(&mut doc, &theirs).expect("apply");

        history.apply_and_record(&mut doc, &[move_to("c", 6.0)]).into_result().expect("apply");
        assert!(!history.has_snapshot());
        history.undo(&mut doc);
        assert_eq!(doc.cards()["c"].x, 0.0);
        assert_eq!(doc.cards()["c"].name, "theirs");
    }

    #[test]
    fn failed_write_keeps_earlier_writes_recorded() {
        let mut doc = Document::from_entities([card("c", 0.0).into_any()]);
        let mut history = HistoryEngine::default();
        let err = history
            .apply_and_record(&mut doc, &[move_to("c", 3.0), move_to("missing", 1.0)])
            .into_result()
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingEntity(_)));
        assert_eq!(history.len(), 1);
        assert_eq!(history.patch_sets()[0].len(), 1);
    }
}
