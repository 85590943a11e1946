//! Offline operation queue, squashing, and batch dispatch.

/// Send state machine and reconciliation of batch results.
pub mod dispatcher;
/// User-visible notification sink.
pub mod notify;
/// Persisted pending-operation queue.
pub mod queue;
/// Pure squash over a list of operations.
pub mod squash;
/// Remote batch endpoint abstraction and HTTP implementation.
pub mod transport;
