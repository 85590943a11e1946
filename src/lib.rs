//! Offline write queue, squashing, batch sync, and undo/redo history for a
//! spatial document of cards, connections, connection types, and boxes.
//!
//! Every local user action is one batch of [`change::LocalChange`]s. The
//! batch is written to the [`core::document::EntityStore`], recorded as one
//! undoable patch set by [`history::engine::HistoryEngine`], and turned into
//! [`op::Operation`]s that wait in [`sync::queue::OperationQueue`] until
//! [`sync::dispatcher::SyncDispatcher`] sends them.
//!
//! # Examples
//!
//! Recording and undoing a card move with [`core::document::Document`]:
//! ```
//! use spacesync::{
//!     change::LocalChange,
//!     core::document::Document,
//!     entity::{Card, CardPatch, Entity},
//!     history::engine::HistoryEngine,
//! };
//!
//! let mut doc = Document::from_entities([Card { id: "c1".into(), ..Card::default() }.into_any()]);
//! let mut history = HistoryEngine::default();
//! let moved = LocalChange::update::<Card>("c1", CardPatch { x: Some(40.0), ..CardPatch::default() });
//! history.apply_and_record(&mut doc, &[moved]).into_result().expect("apply");
//!
//! history.undo(&mut doc);
//! assert_eq!(doc.cards()["c1"].x, 0.0);
//! ```
//!
//! Runtime usage with a SQLite-backed queue:
//! ```no_run
//! use std::sync::Arc;
//!
//! use spacesync::{
//!     change::LocalChange,
//!     config::SyncConfig,
//!     core::document::Document,
//!     entity::Card,
//!     op::Session,
//!     persist::sqlite::SqliteQueueStore,
//!     runtime::handle::{SyncDeps, spawn_space_sync},
//!     sync::transport::HttpTransport,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncConfig::load("spacesync.toml").expect("config");
//! let store = SqliteQueueStore::open("queue.db").expect("open sqlite");
//! let transport = Arc::new(HttpTransport::new(&config));
//! let handle = spawn_space_sync(
//!     Document::new(),
//!     Session::signed_in("user", "space", "api-key"),
//!     SyncDeps::new(Box::new(store), transport),
//!     config,
//! );
//! handle
//!     .apply(vec![LocalChange::create(Card { id: "c1".into(), ..Card::default() })])
//!     .await
//!     .expect("apply");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![warn(missing_docs)]

/// Kind-erased entities and store-level writes.
pub mod change;
/// Runtime configuration.
pub mod config;
/// Entity store interface and in-memory document.
pub mod core;
/// Typed entities and sparse patches.
pub mod entity;
/// Undo/redo history.
pub mod history;
/// Remote operations and sessions.
pub mod op;
/// Durable queue storage.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Operation queue, squash, and dispatch.
pub mod sync;
/// Shared primitive types.
pub mod types;
