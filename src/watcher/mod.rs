//! Watch-session orchestration.
//!
//! # Architecture
//!
//! ```text
//! WatchSession
//!   - ChangeTracker (mtime polling, forced-stale first load)
//!   - Loader (evict + rebuild + execute via the Executor seam)
//!   - StreamSlots/OutputRelay (scoped capture per reload)
//!         |
//!   host scheduler calls tick() every ~100ms
//! ```

mod error;
mod session;
mod tracker;

pub use error::{WatchError, WatchResult};
pub use session::{
    CapturedOutput, DEFAULT_POLL_INTERVAL, TickOutcome, WatchOptions, WatchSession,
};
pub use tracker::{ChangeTracker, PollReport};
