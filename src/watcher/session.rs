//! The watch session state machine.
//!
//! Single-threaded and cooperative: the hosting application calls [`tick`]
//! at a fixed cadence, and all reload activity happens synchronously inside
//! that call. A reload fully completes, including script execution and
//! output draining, before the tick returns.
//!
//! [`tick`]: WatchSession::tick

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::config::Settings;
use crate::relay::{StreamSlots, split_lines};
use crate::script::{
    EntryIdentity, Executor, Loader, ScriptTarget, SharedModuleCache, TOP_LEVEL_NAME,
};
use crate::{debug_event, log_event};

use super::error::{WatchError, WatchResult};
use super::tracker::ChangeTracker;

/// Cadence at which the host scheduler should call `tick()`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-start options supplied by the embedding host.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Forward script output to the real stdout/stderr while it is being
    /// captured. Off by default: the host displays the captured lines.
    pub echo_output: bool,
    /// Load the script under its derived module name and invoke its entry
    /// function, instead of running it as the main program.
    pub run_main: bool,
    /// Annotate `debug` statement output with source positions.
    pub debug_hook: bool,
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Session is not running.
    Idle,
    /// Polled; nothing changed.
    Clean,
    /// Exactly one reload happened, covering every change seen this tick.
    Reloaded(CapturedOutput),
    /// A stop request took effect; cached modules were evicted.
    Stopped,
}

/// Script output captured during one reload, split into display lines.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub output: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Running,
}

/// Orchestrates target resolution, change tracking, module reload and
/// output capture for one watched script slot.
pub struct WatchSession<E: Executor> {
    loader: Loader<E>,
    cache: SharedModuleCache<E::Namespace>,
    slots: StreamSlots,
    tracker: ChangeTracker,
    target: Option<ScriptTarget>,
    options: WatchOptions,
    state: SessionState,
    stop_requested: bool,
    reload_requested: bool,
    marker: String,
    prefix: String,
}

impl<E: Executor> WatchSession<E> {
    /// Build a session around an executor, an injected module cache and the
    /// stream slots the executor writes into.
    pub fn new(
        executor: E,
        cache: SharedModuleCache<E::Namespace>,
        slots: StreamSlots,
        settings: &Settings,
    ) -> Self {
        let loader = Loader::new(
            executor,
            cache.clone(),
            slots.err.clone(),
            settings.watch.entry_function.clone(),
        );
        Self {
            loader,
            cache,
            slots,
            tracker: ChangeTracker::default(),
            target: None,
            options: WatchOptions::default(),
            state: SessionState::Idle,
            stop_requested: false,
            reload_requested: false,
            marker: settings.watch.package_marker.clone(),
            prefix: settings.relay.prefix.clone(),
        }
    }

    /// Begin watching `path`.
    ///
    /// Fails with [`WatchError::InvalidTarget`] when the path is not an
    /// openable regular file, and with [`WatchError::AlreadyRunning`] when a
    /// session is already active for this slot. The actual first load
    /// happens on the first `tick` via the forced-stale rule.
    pub fn start(&mut self, path: &Path, options: WatchOptions) -> WatchResult<()> {
        if self.state == SessionState::Running {
            return Err(WatchError::AlreadyRunning);
        }

        let invalid = |reason: String| WatchError::InvalidTarget {
            path: path.to_path_buf(),
            reason,
        };
        let root = fs::canonicalize(path).map_err(|e| invalid(e.to_string()))?;
        let meta = fs::metadata(&root).map_err(|e| invalid(e.to_string()))?;
        if !meta.is_file() {
            return Err(invalid("not a regular file".to_string()));
        }
        fs::File::open(&root).map_err(|e| invalid(e.to_string()))?;

        let target = ScriptTarget::resolve(&root, &self.marker);
        self.tracker = ChangeTracker::snapshot(&target.source_files);
        self.target = Some(target);
        self.options = options;
        self.apply_options();
        self.stop_requested = false;
        self.reload_requested = false;
        self.state = SessionState::Running;
        log_event!("session", "watching", "{}", root.display());
        Ok(())
    }

    fn apply_options(&mut self) {
        if self.options.echo_output {
            self.slots.out.set_console(Box::new(io::stdout()));
            self.slots.err.set_console(Box::new(io::stderr()));
        } else {
            self.slots.out.set_console(Box::new(io::sink()));
            self.slots.err.set_console(Box::new(io::sink()));
        }
        self.loader.set_entry_identity(if self.options.run_main {
            EntryIdentity::Named
        } else {
            EntryIdentity::TopLevel
        });
        self.loader
            .executor_mut()
            .set_debug_hook(self.options.debug_hook);
    }

    /// Request a stop. Takes effect on the next tick; callers that need the
    /// module cache clean must wait for that tick.
    pub fn stop(&mut self) {
        if self.state == SessionState::Running {
            self.stop_requested = true;
        }
    }

    /// Request a reload regardless of timestamps. One-shot; ignored while
    /// not running.
    pub fn force_reload(&mut self) {
        if self.state == SessionState::Running {
            self.reload_requested = true;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Drive the session once. Nothing escapes this call: every reload
    /// failure becomes error-channel text in the returned capture.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != SessionState::Running {
            return TickOutcome::Idle;
        }

        if self.stop_requested {
            let evicted = match &self.target {
                Some(target) => {
                    let mut cache = self.cache.lock();
                    let mut evicted = cache.evict_under(&target.source_directories);
                    // A single-file target has no source directories, so its
                    // root module must be dropped by name.
                    let name = if self.options.run_main {
                        target.module_name.as_str()
                    } else {
                        TOP_LEVEL_NAME
                    };
                    if cache.remove(name).is_some() {
                        evicted += 1;
                    }
                    evicted
                }
                None => 0,
            };
            debug_event!("session", "evicted on stop", "{evicted} modules");
            self.state = SessionState::Idle;
            self.stop_requested = false;
            self.reload_requested = false;
            log_event!("session", "stopped");
            return TickOutcome::Stopped;
        }

        if self.reload_requested {
            self.reload_requested = false;
            return TickOutcome::Reloaded(self.reload());
        }

        let report = self.tracker.poll();
        if report.changed.is_empty() {
            TickOutcome::Clean
        } else {
            debug_event!("session", "changed", "{} files", report.changed.len());
            TickOutcome::Reloaded(self.reload())
        }
    }

    /// One reload cycle: re-resolve the target (the file set can change
    /// between reloads), capture output through the relay pair, evict and
    /// reload, then restore the streams unconditionally.
    fn reload(&mut self) -> CapturedOutput {
        let Some(root) = self.target.as_ref().map(|t| t.root_path.clone()) else {
            return CapturedOutput::default();
        };
        log_event!("session", "reloading", "{}", root.display());

        let target = ScriptTarget::resolve(&root, &self.marker);
        let guard = self.slots.install(&self.prefix);
        if let Err(e) = self.loader.reload(&target) {
            tracing::error!(target: "session", "reload aborted: {e}");
            self.slots.err.write_str(&format!("{e}\n"));
        }
        let (out_text, err_text) = guard.finish();

        self.tracker.sync(&target.source_files);
        self.target = Some(target);

        CapturedOutput {
            output: split_lines(&out_text),
            errors: split_lines(&err_text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::mock::{MockExecutor, MockLog, MockNamespace};
    use crate::script::{ModuleCache, TOP_LEVEL_NAME};
    use parking_lot::Mutex;
    use std::fs::File;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::SystemTime;
    use tempfile::TempDir;

    const MARKER: &str = "__init__.rhai";

    struct Fixture {
        session: WatchSession<MockExecutor>,
        cache: SharedModuleCache<MockNamespace>,
        log: Arc<Mutex<MockLog>>,
        _dir: TempDir,
        root: PathBuf,
    }

    fn single_file_fixture(source: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("script.rhai");
        fs::write(&root, source).unwrap();
        fixture_for(dir, root)
    }

    fn package_fixture() -> (Fixture, PathBuf) {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("pkg");
        fs::create_dir(&pkg).unwrap();
        let root = pkg.join(MARKER);
        fs::write(&root, "let x = 1;").unwrap();
        let sibling = pkg.join("a.rhai");
        fs::write(&sibling, "let y = 2;").unwrap();
        (fixture_for(dir, root), sibling)
    }

    fn fixture_for(dir: TempDir, root: PathBuf) -> Fixture {
        let (executor, log) = MockExecutor::new();
        let cache = ModuleCache::shared();
        let slots = StreamSlots::sink();
        let session = WatchSession::new(executor, cache.clone(), slots, &Settings::default());
        Fixture {
            session,
            cache,
            log,
            _dir: dir,
            root,
        }
    }

    fn bump_mtime(path: &Path) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
    }

    #[test]
    fn first_tick_always_reloads_once() {
        let mut fx = single_file_fixture("let x = 1;");
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();

        assert!(matches!(fx.session.tick(), TickOutcome::Reloaded(_)));
        assert_eq!(fx.log.lock().executed.len(), 1);

        // No changes: the next tick is clean.
        assert!(matches!(fx.session.tick(), TickOutcome::Clean));
        assert_eq!(fx.log.lock().executed.len(), 1);
    }

    #[test]
    fn two_changed_files_trigger_exactly_one_reload() {
        let (mut fx, sibling) = package_fixture();
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();
        fx.session.tick(); // initial load

        bump_mtime(&fx.root);
        bump_mtime(&sibling);
        assert!(matches!(fx.session.tick(), TickOutcome::Reloaded(_)));
        assert_eq!(fx.log.lock().executed.len(), 2);

        assert!(matches!(fx.session.tick(), TickOutcome::Clean));
    }

    #[test]
    fn start_while_running_is_a_noop_failure() {
        let mut fx = single_file_fixture("let x = 1;");
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();
        let err = fx.session.start(&fx.root, WatchOptions::default());
        assert!(matches!(err, Err(WatchError::AlreadyRunning)));
        assert!(fx.session.is_running());
    }

    #[test]
    fn start_rejects_missing_or_non_file_targets() {
        let mut fx = single_file_fixture("let x = 1;");
        let missing = fx.root.with_file_name("nope.rhai");
        assert!(matches!(
            fx.session.start(&missing, WatchOptions::default()),
            Err(WatchError::InvalidTarget { .. })
        ));

        let dir_path = fx.root.parent().unwrap().to_path_buf();
        assert!(matches!(
            fx.session.start(&dir_path, WatchOptions::default()),
            Err(WatchError::InvalidTarget { .. })
        ));
        assert!(!fx.session.is_running());
    }

    #[test]
    fn force_reload_is_one_shot() {
        let mut fx = single_file_fixture("let x = 1;");
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();
        fx.session.tick();

        fx.session.force_reload();
        assert!(matches!(fx.session.tick(), TickOutcome::Reloaded(_)));
        assert!(matches!(fx.session.tick(), TickOutcome::Clean));
        assert_eq!(fx.log.lock().executed.len(), 2);
    }

    #[test]
    fn stop_takes_effect_on_next_tick_and_evicts() {
        let (mut fx, _sibling) = package_fixture();
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();
        fx.session.tick();
        assert!(!fx.cache.lock().is_empty());

        fx.session.stop();
        // Stop is deferred: still running until the tick observes the flag.
        assert!(fx.session.is_running());
        assert!(matches!(fx.session.tick(), TickOutcome::Stopped));
        assert!(!fx.session.is_running());
        assert!(fx.cache.lock().is_empty());

        // Idempotent in any state.
        fx.session.stop();
        assert!(matches!(fx.session.tick(), TickOutcome::Idle));
    }

    #[test]
    fn stop_evicts_the_single_file_root_module() {
        let mut fx = single_file_fixture("let x = 1;");
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();
        fx.session.tick();
        assert!(fx.cache.lock().get(TOP_LEVEL_NAME).is_some());

        // The root lives outside any package directory; stop must still
        // drop its cache entry.
        fx.session.stop();
        assert!(matches!(fx.session.tick(), TickOutcome::Stopped));
        assert!(fx.cache.lock().is_empty());
    }

    #[test]
    fn force_reload_ignored_when_idle() {
        let mut fx = single_file_fixture("let x = 1;");
        fx.session.force_reload();
        assert!(matches!(fx.session.tick(), TickOutcome::Idle));
        assert!(fx.log.lock().executed.is_empty());
    }

    #[test]
    fn syntax_error_keeps_session_running_and_surfaces_text() {
        let mut fx = single_file_fixture("@syntax-error");
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();

        let TickOutcome::Reloaded(capture) = fx.session.tick() else {
            panic!("expected a reload");
        };
        assert!(fx.session.is_running());
        assert!(!capture.errors.is_empty());
        assert!(capture.errors[0].contains("syntax error"));

        // A subsequent valid reload succeeds; the session is not corrupted.
        fs::write(&fx.root, "let x = 2;").unwrap();
        bump_mtime(&fx.root);
        assert!(matches!(fx.session.tick(), TickOutcome::Reloaded(_)));
        assert_eq!(fx.log.lock().executed, vec!["let x = 2;".to_string()]);
    }

    #[test]
    fn reload_picks_up_files_added_to_the_package() {
        let (mut fx, _sibling) = package_fixture();
        fx.session.start(&fx.root, WatchOptions::default()).unwrap();
        fx.session.tick();

        // A file added between reloads joins the watch set after the next
        // reload (the target is recomputed each cycle).
        let added = fx.root.parent().unwrap().join("new.rhai");
        fs::write(&added, "let z = 3;").unwrap();
        bump_mtime(&fx.root);
        fx.session.tick();

        bump_mtime(&added);
        assert!(matches!(fx.session.tick(), TickOutcome::Reloaded(_)));
        assert_eq!(fx.log.lock().executed.len(), 3);
    }

    #[test]
    fn run_main_mode_calls_entry_and_uses_derived_name() {
        let mut fx = single_file_fixture("fn main() {}");
        fx.session
            .start(
                &fx.root,
                WatchOptions {
                    run_main: true,
                    ..WatchOptions::default()
                },
            )
            .unwrap();
        fx.session.tick();

        assert_eq!(fx.log.lock().entry_calls, vec!["main".to_string()]);
        assert!(fx.cache.lock().get("script").is_some());
        assert!(fx.cache.lock().get(TOP_LEVEL_NAME).is_none());
    }
}
