//! Data model for the scheduled publishing engine.
//!
//! This crate holds the [`ScheduledPost`] aggregate and everything it owns:
//! - per-platform [`PlatformTarget`] sub-entities with independent statuses
//! - the append-only execution log
//! - the derived overall status computation
//! - the [`RetryPolicy`] backoff/limit rule
//!
//! It is pure data plus invariants; all IO lives in the scheduler and
//! publisher crates.

mod error;
mod post;
mod retry;
mod types;

pub use error::PostError;
pub use post::{NewPost, ScheduledPost, overall_status_of};
pub use retry::RetryPolicy;
pub use types::{
    ContentRef, ErrorCode, ExecutionLogEntry, LastError, LogAction, Platform, PlatformTarget,
    PostStatus, Priority, RetryState, ScheduledBy, SchedulingMeta, TargetMetrics, TargetStatus,
};
