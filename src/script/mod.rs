//! Script discovery, module caching and execution.
//!
//! # Architecture
//!
//! ```text
//! ScriptTarget (target)      what is being watched: files + search dirs
//! ModuleCache  (cache)       name -> loaded module, evictable by directory
//! Executor     (executor)    the eval seam; RhaiExecutor in production
//! Loader       (loader)      build -> register -> execute -> re-register
//! ```

mod cache;
mod error;
mod executor;
mod loader;
mod rhai;
mod target;

pub use cache::{CachedModule, ModuleCache, SharedModuleCache};
pub use error::{ExecError, LoadError, LoadResult};
pub use executor::Executor;
pub use loader::{EntryIdentity, Loader, ModuleIdentity, TOP_LEVEL_NAME};
pub use rhai::{RhaiExecutor, RhaiNamespace, SCRIPT_FILE, SCRIPT_NAME, SCRIPT_PACKAGE};
pub use target::{ScriptTarget, module_name};

#[cfg(test)]
pub(crate) use executor::mock;
