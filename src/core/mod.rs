//! Entity store interface and in-memory document.

/// Entity store trait, in-memory document, and write application.
pub mod document;
