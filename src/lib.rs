//! # a3s-audit
//!
//! Sequenced, persisted, live-broadcast audit log for long-running A3S jobs.
//!
//! ## Overview
//!
//! Every job run gets an audit session. Each step the job takes (database
//! access, LLM calls, chunk processing, errors) is submitted as a typed event,
//! stamped with a gap-free per-session sequence number, fanned out to live
//! subscribers, and written to a durable event store. Late subscribers
//! receive the buffered history first and then the live tail, with no gap
//! and no duplicate in between.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_audit::{AuditService, JobOutcome, SessionRequest};
//! use a3s_audit::provider::memory::MemoryEventStore;
//! use a3s_audit::types::{ChunkProcessed, EventData};
//!
//! # async fn example() -> a3s_audit::Result<()> {
//! let service = AuditService::with_store(MemoryEventStore::new());
//!
//! let session_id = service
//!     .start_session(SessionRequest::new("user-1", "reconstruction").with_target_words(2000))
//!     .await?;
//!
//! service
//!     .submit_event(
//!         &session_id,
//!         EventData::ChunkProcessed(ChunkProcessed {
//!             chunk_index: 0,
//!             input_words: 480,
//!             output_words: 510,
//!             target_words: 500,
//!             within_tolerance: true,
//!             claims_addressed: None,
//!             violations: None,
//!         }),
//!     )
//!     .await?;
//!
//! service.complete_session(&session_id, JobOutcome::succeeded()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Stores
//!
//! - **memory** — in-process, for tests and single-run use
//! - **jsonl** — session records plus one append-only JSONL file per session
//!
//! ## Architecture
//!
//! - **EventStore** trait — durable sessions and entries, any backend
//! - **SessionRegistry** — live sessions, shared by `Arc`
//! - **Broadcaster** — replay-then-live fan-out over bounded channels
//! - **AuditService** — sequencing, persistence, and completion
//! - **server** — WebSocket live channel and HTTP ingestion and query API

pub mod broadcast;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod provider;
pub mod registry;
pub mod server;
pub mod types;

pub use broadcast::{Broadcaster, Delivery, Subscriber, SubscriberId};
pub use config::{AuditConfig, StoreBackend};
pub use error::{AuditError, Result};
pub use lifecycle::{AuditService, JobOutcome, SessionRequest};
pub use provider::{EventStore, SessionCompletion};
pub use registry::{ActiveSession, SessionRegistry};
pub use types::{AuditEntry, AuditSession, EventData, EventType, SessionReport, SessionStatus};

pub use provider::jsonl::JsonlEventStore;
pub use provider::memory::MemoryEventStore;
