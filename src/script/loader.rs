//! Module construction, registration and reload.
//!
//! The loader owns the executor and turns a [`ScriptTarget`] into a cached,
//! executed module. Registration happens before execution so that
//! self-referential imports resolve to the in-progress module, and eviction
//! happens strictly before a reload so imports re-resolve fresh submodules.

use std::fs;
use std::path::PathBuf;

use crate::debug_event;
use crate::relay::StreamSlot;

use super::cache::{CachedModule, SharedModuleCache};
use super::error::{ExecError, LoadError, LoadResult};
use super::executor::Executor;
use super::target::ScriptTarget;

/// Name given to a module loaded as "the main program".
///
/// Scripts observe it through the `SCRIPT_NAME` constant and can use it for
/// the usual "am I top-level" check.
pub const TOP_LEVEL_NAME: &str = "main";

/// Which identity a freshly loaded root module assumes.
///
/// Code that inspects its own top-level status behaves differently under the
/// two names, so the mode is an explicit flag rather than a naming trick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryIdentity {
    /// The module is named [`TOP_LEVEL_NAME`]; no entry function is called.
    TopLevel,
    /// The module keeps its derived package/module name and its entry
    /// function is invoked after execution.
    Named,
}

/// Identity attributes stamped onto every loaded module.
#[derive(Debug, Clone)]
pub struct ModuleIdentity {
    /// Module name (cache key): derived name or the top-level sentinel.
    pub name: String,
    /// The root source file.
    pub file: PathBuf,
    /// Derived package/module name, independent of the identity mode.
    pub package_name: String,
    /// Directories searched for imports.
    pub search_path: Vec<PathBuf>,
}

/// Builds, registers and executes modules for one watched script.
pub struct Loader<E: Executor> {
    executor: E,
    cache: SharedModuleCache<E::Namespace>,
    error_stream: StreamSlot,
    entry_identity: EntryIdentity,
    entry_function: String,
}

impl<E: Executor> Loader<E> {
    pub fn new(
        executor: E,
        cache: SharedModuleCache<E::Namespace>,
        error_stream: StreamSlot,
        entry_function: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            cache,
            error_stream,
            entry_identity: EntryIdentity::TopLevel,
            entry_function: entry_function.into(),
        }
    }

    pub fn set_entry_identity(&mut self, mode: EntryIdentity) {
        self.entry_identity = mode;
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    fn identity(&self, target: &ScriptTarget) -> ModuleIdentity {
        let name = match self.entry_identity {
            EntryIdentity::TopLevel => TOP_LEVEL_NAME.to_string(),
            EntryIdentity::Named => target.module_name.clone(),
        };
        ModuleIdentity {
            name,
            file: target.root_path.clone(),
            package_name: target.module_name.clone(),
            search_path: target.source_directories.clone(),
        }
    }

    /// Read and compile the root source, and construct the module namespace.
    ///
    /// Fails with [`LoadError::Open`] when the file cannot be read and with
    /// [`LoadError::Syntax`] when it does not compile; both abort only the
    /// current reload.
    pub fn build(
        &mut self,
        target: &ScriptTarget,
    ) -> LoadResult<(E::Unit, ModuleIdentity, E::Namespace)> {
        let source = fs::read_to_string(&target.root_path).map_err(|e| LoadError::Open {
            path: target.root_path.clone(),
            source: e,
        })?;
        let unit = self.executor.compile(&source, &target.root_path)?;
        let identity = self.identity(target);
        let namespace = self.executor.namespace(&identity);
        Ok((unit, identity, namespace))
    }

    /// Build the module, register it, execute it and re-register the result.
    ///
    /// Registration precedes execution (import-system reentrancy). Any error
    /// raised by the script itself, including from the entry function, is
    /// formatted onto the error stream and does not propagate; a broken
    /// script must not take the watch session down with it.
    pub fn load(&mut self, target: &ScriptTarget) -> LoadResult<()> {
        let (unit, identity, mut namespace) = self.build(target)?;

        self.cache.lock().insert(CachedModule {
            name: identity.name.clone(),
            file: Some(identity.file.clone()),
            namespace: namespace.clone(),
        });
        self.executor.set_search_path(&identity.search_path);

        match self.executor.execute(&unit, &mut namespace) {
            Ok(()) => {
                if self.entry_identity == EntryIdentity::Named {
                    let entry = self.entry_function.clone();
                    if let Err(e) = self.executor.call_entry(&unit, &mut namespace, &entry) {
                        self.report(&identity, &e);
                    }
                }
            }
            Err(e) => self.report(&identity, &e),
        }

        // The executed namespace is a fresh instance, never a mutated reuse
        // of the previous reload's module.
        self.cache.lock().insert(CachedModule {
            name: identity.name.clone(),
            file: Some(identity.file),
            namespace,
        });
        Ok(())
    }

    /// Evict every cached module under the target's source directories, then
    /// load. Eviction must come first so imports inside the reloaded code
    /// re-resolve fresh submodules instead of stale cached ones.
    pub fn reload(&mut self, target: &ScriptTarget) -> LoadResult<()> {
        let evicted = self.cache.lock().evict_under(&target.source_directories);
        debug_event!("loader", "evicted", "{evicted} cached modules");
        self.load(target)
    }

    fn report(&self, identity: &ModuleIdentity, error: &ExecError) {
        tracing::error!(target: "loader", "script error in {}: {error}", identity.file.display());
        self.error_stream
            .write_str(&format!("error in {}: {error}\n", identity.file.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::StreamSlots;
    use crate::script::cache::ModuleCache;
    use crate::script::executor::mock::{MockExecutor, MockNamespace};
    use std::fs;
    use tempfile::TempDir;

    fn target_for(source: &str) -> (TempDir, ScriptTarget) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("script.rhai");
        fs::write(&root, source).unwrap();
        let target = ScriptTarget::resolve(&root, "__init__.rhai");
        (dir, target)
    }

    fn loader_with_capture(
        executor: MockExecutor,
    ) -> (Loader<MockExecutor>, SharedModuleCache<MockNamespace>, StreamSlots) {
        let cache = ModuleCache::shared();
        let slots = StreamSlots::sink();
        let loader = Loader::new(executor, cache.clone(), slots.err.clone(), "main");
        (loader, cache, slots)
    }

    #[test]
    fn load_registers_module_under_top_level_name() {
        let (executor, log) = MockExecutor::new();
        let (mut loader, cache, _slots) = loader_with_capture(executor);
        let (_dir, target) = target_for("let x = 1;");

        loader.load(&target).unwrap();

        let cache = cache.lock();
        let module = cache.get(TOP_LEVEL_NAME).unwrap();
        assert_eq!(module.file.as_deref(), Some(target.root_path.as_path()));
        assert_eq!(module.namespace.identity_name, TOP_LEVEL_NAME);
        assert_eq!(log.lock().executed.len(), 1);
    }

    #[test]
    fn named_mode_uses_derived_name_and_calls_entry() {
        let (executor, log) = MockExecutor::new();
        let (mut loader, cache, _slots) = loader_with_capture(executor);
        loader.set_entry_identity(EntryIdentity::Named);
        let (_dir, target) = target_for("fn main() {}");

        loader.load(&target).unwrap();

        assert!(cache.lock().get("script").is_some());
        assert!(cache.lock().get(TOP_LEVEL_NAME).is_none());
        assert_eq!(log.lock().entry_calls, vec!["main".to_string()]);
    }

    #[test]
    fn entry_not_called_in_top_level_mode() {
        let (executor, log) = MockExecutor::new();
        let (mut loader, _cache, _slots) = loader_with_capture(executor);
        let (_dir, target) = target_for("fn main() {}");

        loader.load(&target).unwrap();
        assert!(log.lock().entry_calls.is_empty());
    }

    #[test]
    fn runtime_error_is_reported_not_propagated() {
        let (executor, log) = MockExecutor::new();
        let (mut loader, _cache, slots) = loader_with_capture(executor);
        let (_dir, target) = target_for("@runtime-error");

        let guard = slots.install("");
        loader.load(&target).unwrap();
        let (_, err_text) = guard.finish();

        assert!(err_text.contains("mock runtime error"));
        assert!(log.lock().executed.is_empty());
    }

    #[test]
    fn syntax_error_aborts_the_load() {
        let (executor, log) = MockExecutor::new();
        let (mut loader, cache, _slots) = loader_with_capture(executor);
        let (_dir, target) = target_for("@syntax-error");

        let err = loader.load(&target).unwrap_err();
        assert!(matches!(err, LoadError::Syntax { .. }));
        assert!(cache.lock().is_empty());
        assert!(log.lock().executed.is_empty());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let (executor, _log) = MockExecutor::new();
        let (mut loader, _cache, _slots) = loader_with_capture(executor);
        let (dir, mut target) = target_for("let x = 1;");
        target.root_path = dir.path().join("gone.rhai");
        target.source_files = vec![target.root_path.clone()];

        let err = loader.load(&target).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
    }
}
