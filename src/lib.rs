//! Live-reload host for Rhai scripts.
//!
//! Watches a script file, or a package tree marked by `__init__.rhai` entry
//! points, and re-executes it inside the running process whenever it changes.
//! Stale cached modules are evicted before every reload and the script's
//! print/debug output is captured for the embedding host to display.
//!
//! The engine is single-threaded and cooperative: the host calls
//! [`WatchSession::tick`] at a fixed cadence and every reload completes
//! synchronously inside that call.

pub mod config;
pub mod logging;
pub mod relay;
pub mod script;
pub mod watcher;

pub use config::Settings;
pub use relay::{OutputRelay, RelayGuard, StreamSlot, StreamSlots, split_lines};
pub use script::{
    CachedModule, EntryIdentity, ExecError, Executor, LoadError, Loader, ModuleCache,
    ModuleIdentity, RhaiExecutor, RhaiNamespace, ScriptTarget, SharedModuleCache, TOP_LEVEL_NAME,
};
pub use watcher::{
    CapturedOutput, ChangeTracker, DEFAULT_POLL_INTERVAL, TickOutcome, WatchError, WatchOptions,
    WatchSession,
};
