//! Undo/redo history over the entity store.

/// Patch-set log, pointer navigation, and pause/resume.
pub mod engine;
/// Reversible per-entity changes and their replay.
pub mod patch;
