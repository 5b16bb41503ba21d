//! Process-wide module registry.
//!
//! The cache is an explicit injected registry rather than ambient global
//! state, so every test can own an isolated instance. It outlives any one
//! watch session; stale entries are the reason eviction exists.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A loaded module held by the cache.
#[derive(Debug, Clone)]
pub struct CachedModule<N> {
    /// Cache key: the derived module name.
    pub name: String,
    /// Originating source file. `None` for native modules, which are never
    /// evicted.
    pub file: Option<PathBuf>,
    /// The executor-specific module namespace.
    pub namespace: N,
}

/// Registry mapping module names to loaded modules.
#[derive(Debug, Default)]
pub struct ModuleCache<N> {
    entries: HashMap<String, CachedModule<N>>,
}

/// The cache handle shared between the loader, the executor's import
/// resolver and the embedding host.
pub type SharedModuleCache<N> = Arc<Mutex<ModuleCache<N>>>;

impl<N> ModuleCache<N> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a fresh cache behind a shared handle.
    pub fn shared() -> SharedModuleCache<N> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn get(&self, name: &str) -> Option<&CachedModule<N>> {
        self.entries.get(name)
    }

    /// Register a module. A reload always replaces the prior entry.
    pub fn insert(&mut self, module: CachedModule<N>) {
        self.entries.insert(module.name.clone(), module);
    }

    pub fn remove(&mut self, name: &str) -> Option<CachedModule<N>> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry whose originating file lives directly under one of
    /// `directories`. Entries without a file attribute survive. Returns the
    /// number of evicted modules.
    pub fn evict_under(&mut self, directories: &[PathBuf]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, module| {
            let Some(file) = &module.file else {
                return true;
            };
            !file
                .parent()
                .is_some_and(|dir| directories.iter().any(|d| d.as_path() == dir))
        });
        before - self.entries.len()
    }
}
