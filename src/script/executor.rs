//! The execution seam.
//!
//! Dynamic execution of compiled source into a constructed namespace is the
//! single point where host-language "eval" semantics are invoked. Keeping it
//! behind a trait lets alternate (e.g. sandboxed) executors be substituted,
//! and lets session tests run against a recording mock.

use std::path::{Path, PathBuf};

use super::error::{ExecError, LoadError};
use super::loader::ModuleIdentity;

/// Compiles and executes script source.
pub trait Executor {
    /// A compiled program.
    type Unit;
    /// The attribute namespace a program executes into.
    type Namespace: Clone;

    /// Compile source text read from `origin`.
    ///
    /// Compilation failures surface as [`LoadError::Syntax`]; they abort only
    /// the current reload.
    fn compile(&self, source: &str, origin: &Path) -> Result<Self::Unit, LoadError>;

    /// Construct a fresh namespace carrying the module's identity attributes.
    fn namespace(&self, identity: &ModuleIdentity) -> Self::Namespace;

    /// Set the directories searched when the running script imports modules.
    fn set_search_path(&mut self, directories: &[PathBuf]);

    /// Execute a compiled program against a namespace.
    fn execute(&mut self, unit: &Self::Unit, namespace: &mut Self::Namespace)
    -> Result<(), ExecError>;

    /// Invoke a zero-argument entry function if the program defines one.
    ///
    /// Returns `Ok(false)` when the function is absent.
    fn call_entry(
        &mut self,
        unit: &Self::Unit,
        namespace: &mut Self::Namespace,
        entry: &str,
    ) -> Result<bool, ExecError>;

    /// Toggle positional debug output. Default: no-op.
    fn set_debug_hook(&mut self, _enabled: bool) {}
}
