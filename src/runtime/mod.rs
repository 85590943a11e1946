//! Single-writer actor that owns a space's document, queue, and history.

/// Events broadcast by the actor.
pub mod events;
/// Actor spawn, command loop, and the cloneable handle.
pub mod handle;
