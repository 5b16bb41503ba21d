//! Rhai-backed executor.
//!
//! The production [`Executor`]: compiles Rhai source, executes it against a
//! scope carrying the module's identity constants, routes `print`/`debug`
//! statements to the active stream slots and resolves `import` statements
//! through the shared module cache, so eviction forces the next import to
//! re-read from disk.

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rhai::{
    AST, CallFnOptions, Dynamic, Engine, EvalAltResult, Module, ModuleResolver, Position, Scope,
    Shared,
};

use crate::debug_event;
use crate::relay::StreamSlots;

use super::cache::{CachedModule, SharedModuleCache};
use super::error::{ExecError, LoadError};
use super::executor::Executor;
use super::loader::ModuleIdentity;

/// Identity constants pushed into every module scope.
///
/// A script checks `SCRIPT_NAME == "main"` to know whether it runs as the
/// main program or as a named module.
pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
pub const SCRIPT_FILE: &str = "SCRIPT_FILE";
pub const SCRIPT_PACKAGE: &str = "SCRIPT_PACKAGE";

/// The namespace a Rhai module executes into.
#[derive(Clone)]
pub struct RhaiNamespace {
    /// Top-level variables, populated by execution.
    pub scope: Scope<'static>,
    /// Export table served to importers of this module.
    pub exports: Shared<Module>,
}

impl RhaiNamespace {
    /// Look up a top-level variable by name.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<T> {
        self.scope.get_value(name)
    }
}

/// Executes scripts with an embedded Rhai engine.
pub struct RhaiExecutor {
    engine: Engine,
    search_path: Arc<Mutex<Vec<PathBuf>>>,
    debug_positions: Arc<AtomicBool>,
}

impl RhaiExecutor {
    /// Build an engine wired to the given cache and stream slots.
    ///
    /// `print` goes to the stdout slot and `debug` to the stderr slot, one
    /// write per statement with a trailing newline so the relay prefixes
    /// each statement's first line.
    pub fn new(cache: SharedModuleCache<RhaiNamespace>, slots: &StreamSlots) -> Self {
        let mut engine = Engine::new();
        let search_path = Arc::new(Mutex::new(Vec::new()));
        engine.set_module_resolver(CacheResolver {
            cache,
            search_path: search_path.clone(),
        });

        let out = slots.out.clone();
        engine.on_print(move |text| out.write_str(&format!("{text}\n")));

        let err = slots.err.clone();
        let debug_positions = Arc::new(AtomicBool::new(false));
        let positions = debug_positions.clone();
        engine.on_debug(move |text, source, pos| {
            if positions.load(Ordering::Relaxed) && !pos.is_none() {
                let source = source.unwrap_or("script");
                err.write_str(&format!("{text} @ {source} ({pos})\n"));
            } else {
                err.write_str(&format!("{text}\n"));
            }
        });

        Self {
            engine,
            search_path,
            debug_positions,
        }
    }
}

impl Executor for RhaiExecutor {
    type Unit = AST;
    type Namespace = RhaiNamespace;

    fn compile(&self, source: &str, origin: &Path) -> Result<AST, LoadError> {
        let mut ast = self.engine.compile(source).map_err(|e| LoadError::Syntax {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        ast.set_source(origin.display().to_string());
        Ok(ast)
    }

    fn namespace(&self, identity: &ModuleIdentity) -> RhaiNamespace {
        let mut scope = Scope::new();
        scope.push_constant(SCRIPT_NAME, identity.name.clone());
        scope.push_constant(SCRIPT_FILE, identity.file.display().to_string());
        scope.push_constant(SCRIPT_PACKAGE, identity.package_name.clone());
        RhaiNamespace {
            scope,
            exports: Shared::new(Module::new()),
        }
    }

    fn set_search_path(&mut self, directories: &[PathBuf]) {
        *self.search_path.lock() = directories.to_vec();
    }

    fn execute(&mut self, unit: &AST, namespace: &mut RhaiNamespace) -> Result<(), ExecError> {
        self.engine
            .run_ast_with_scope(&mut namespace.scope, unit)
            .map_err(|e| ExecError::new(e.to_string()))?;
        namespace.exports = exports_from_scope(&namespace.scope);
        Ok(())
    }

    fn call_entry(
        &mut self,
        unit: &AST,
        namespace: &mut RhaiNamespace,
        entry: &str,
    ) -> Result<bool, ExecError> {
        let defined = unit
            .iter_functions()
            .any(|f| f.name == entry && f.params.is_empty());
        if !defined {
            return Ok(false);
        }
        // The statements already ran in `execute`; only call the function.
        let options = CallFnOptions::new().eval_ast(false);
        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut namespace.scope, unit, entry, ())
            .map_err(|e| ExecError::new(e.to_string()))?;
        Ok(true)
    }

    fn set_debug_hook(&mut self, enabled: bool) {
        self.debug_positions.store(enabled, Ordering::Relaxed);
    }
}

/// Snapshot the scope's variables into an export table for importers.
fn exports_from_scope(scope: &Scope) -> Shared<Module> {
    let mut module = Module::new();
    for (name, _, value) in scope.iter() {
        module.set_var(name, value);
    }
    module.build_index();
    Shared::new(module)
}

/// Import resolver backed by the shared module cache.
///
/// A cache hit serves the stored export table; a miss locates `<name>.rhai`
/// in the current search path, compiles and evaluates it as a new module and
/// registers it in the cache with its originating file, making it subject to
/// eviction like any other module.
struct CacheResolver {
    cache: SharedModuleCache<RhaiNamespace>,
    search_path: Arc<Mutex<Vec<PathBuf>>>,
}

impl ModuleResolver for CacheResolver {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        if let Some(entry) = self.cache.lock().get(path) {
            debug_event!("resolver", "cache hit", "{path}");
            return Ok(entry.namespace.exports.clone());
        }

        let directories = self.search_path.lock().clone();
        for dir in &directories {
            let file = dir.join(format!("{path}.rhai"));
            if !file.is_file() {
                continue;
            }
            let source = fs::read_to_string(&file).map_err(|e| {
                Box::new(EvalAltResult::ErrorInModule(
                    path.to_string(),
                    Box::new(EvalAltResult::ErrorSystem(e.to_string(), Box::new(e))),
                    pos,
                ))
            })?;
            let mut ast = engine.compile(&source).map_err(|e| {
                Box::new(EvalAltResult::ErrorInModule(path.to_string(), e.into(), pos))
            })?;
            ast.set_source(path);
            let module = Module::eval_ast_as_new(Scope::new(), &ast, engine)
                .map_err(|e| Box::new(EvalAltResult::ErrorInModule(path.to_string(), e, pos)))?;

            let exports: Shared<Module> = Shared::new(module);
            self.cache.lock().insert(CachedModule {
                name: path.to_string(),
                file: Some(file),
                namespace: RhaiNamespace {
                    scope: Scope::new(),
                    exports: exports.clone(),
                },
            });
            debug_event!("resolver", "loaded module", "{path}");
            return Ok(exports);
        }

        Err(Box::new(EvalAltResult::ErrorModuleNotFound(
            path.to_string(),
            pos,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::cache::ModuleCache;

    fn executor() -> (RhaiExecutor, SharedModuleCache<RhaiNamespace>, StreamSlots) {
        let cache = ModuleCache::shared();
        let slots = StreamSlots::sink();
        let executor = RhaiExecutor::new(cache.clone(), &slots);
        (executor, cache, slots)
    }

    fn identity(name: &str) -> ModuleIdentity {
        ModuleIdentity {
            name: name.to_string(),
            file: PathBuf::from("/tmp/script.rhai"),
            package_name: "script".to_string(),
            search_path: Vec::new(),
        }
    }

    #[test]
    fn executes_source_into_scope() {
        let (mut executor, _cache, _slots) = executor();
        let unit = executor
            .compile("let x = 40 + 2;", Path::new("script.rhai"))
            .unwrap();
        let mut ns = executor.namespace(&identity("main"));
        executor.execute(&unit, &mut ns).unwrap();
        assert_eq!(ns.get::<i64>("x"), Some(42));
    }

    #[test]
    fn identity_constants_are_visible_to_scripts() {
        let (mut executor, _cache, _slots) = executor();
        let unit = executor
            .compile("let top = SCRIPT_NAME == \"main\";", Path::new("s.rhai"))
            .unwrap();
        let mut ns = executor.namespace(&identity("main"));
        executor.execute(&unit, &mut ns).unwrap();
        assert_eq!(ns.get::<bool>("top"), Some(true));
    }

    #[test]
    fn compile_error_is_syntax() {
        let (executor, _cache, _slots) = executor();
        let err = executor
            .compile("let = ;", Path::new("bad.rhai"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Syntax { .. }));
    }

    #[test]
    fn entry_absent_returns_false() {
        let (mut executor, _cache, _slots) = executor();
        let unit = executor.compile("let x = 1;", Path::new("s.rhai")).unwrap();
        let mut ns = executor.namespace(&identity("script"));
        executor.execute(&unit, &mut ns).unwrap();
        assert!(!executor.call_entry(&unit, &mut ns, "main").unwrap());
    }

    #[test]
    fn entry_function_runs_against_the_scope() {
        let (mut executor, _cache, slots) = executor();
        let unit = executor
            .compile("fn main() { print(\"from main\"); }", Path::new("s.rhai"))
            .unwrap();
        let mut ns = executor.namespace(&identity("script"));
        executor.execute(&unit, &mut ns).unwrap();

        let guard = slots.install("");
        assert!(executor.call_entry(&unit, &mut ns, "main").unwrap());
        let (out, _) = guard.finish();
        assert_eq!(out, "from main\n");
    }

    #[test]
    fn print_routes_through_the_stdout_slot() {
        let (mut executor, _cache, slots) = executor();
        let unit = executor
            .compile("print(\"hello\");", Path::new("s.rhai"))
            .unwrap();
        let mut ns = executor.namespace(&identity("main"));

        let guard = slots.install("[Script Watcher]: ");
        executor.execute(&unit, &mut ns).unwrap();
        let (out, err) = guard.finish();
        assert_eq!(out, "[Script Watcher]: hello\n");
        assert!(err.is_empty());
    }

    #[test]
    fn runtime_error_carries_the_script_message() {
        let (mut executor, _cache, _slots) = executor();
        let unit = executor
            .compile("throw \"boom\";", Path::new("s.rhai"))
            .unwrap();
        let mut ns = executor.namespace(&identity("main"));
        let err = executor.execute(&unit, &mut ns).unwrap_err();
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn imports_resolve_through_cache_and_register_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let helper = dir.path().join("helper.rhai");
        std::fs::write(&helper, "export const VALUE = 7;\n").unwrap();

        let (mut executor, cache, _slots) = executor();
        executor.set_search_path(&[dir.path().to_path_buf()]);

        let unit = executor
            .compile("import \"helper\" as h; let v = h::VALUE;", Path::new("s.rhai"))
            .unwrap();
        let mut ns = executor.namespace(&identity("main"));
        executor.execute(&unit, &mut ns).unwrap();

        assert_eq!(ns.get::<i64>("v"), Some(7));
        let cache = cache.lock();
        let cached = cache.get("helper").unwrap();
        assert_eq!(cached.file.as_deref(), Some(helper.as_path()));
    }

    #[test]
    fn evicted_import_is_reloaded_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let helper = dir.path().join("helper.rhai");
        std::fs::write(&helper, "export const VALUE = 1;\n").unwrap();

        let (mut executor, cache, _slots) = executor();
        executor.set_search_path(&[dir.path().to_path_buf()]);
        let unit = executor
            .compile("import \"helper\" as h; let v = h::VALUE;", Path::new("s.rhai"))
            .unwrap();

        let mut ns = executor.namespace(&identity("main"));
        executor.execute(&unit, &mut ns).unwrap();
        assert_eq!(ns.get::<i64>("v"), Some(1));

        // Without eviction the stale module is served from the cache.
        std::fs::write(&helper, "export const VALUE = 2;\n").unwrap();
        let mut ns = executor.namespace(&identity("main"));
        executor.execute(&unit, &mut ns).unwrap();
        assert_eq!(ns.get::<i64>("v"), Some(1));

        cache.lock().evict_under(&[dir.path().to_path_buf()]);
        let mut ns = executor.namespace(&identity("main"));
        executor.execute(&unit, &mut ns).unwrap();
        assert_eq!(ns.get::<i64>("v"), Some(2));
    }
}
