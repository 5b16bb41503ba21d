use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::{fs, thread};

use scriptwatch::config::CONFIG_FILE;
use scriptwatch::script::ModuleCache;
use scriptwatch::{
    RhaiExecutor, Settings, StreamSlots, TickOutcome, WatchOptions, WatchSession, logging,
};

#[derive(Parser)]
#[command(name = "scriptwatch")]
#[command(about = "Reloads an external Rhai script on edits", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Watch a script and reload it on changes
    Watch {
        /// Path to the script file (or a package's __init__.rhai)
        script: PathBuf,

        /// Load under the derived module name and call its main() function
        #[arg(long)]
        run_main: bool,

        /// Stream script output to the console as it happens, in addition
        /// to the captured lines
        #[arg(long)]
        echo: bool,

        /// Annotate debug statements with source positions
        #[arg(long)]
        debug_hook: bool,

        /// Tick interval in milliseconds (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Load and execute a script once, then exit
    Run {
        /// Path to the script file (or a package's __init__.rhai)
        script: PathBuf,

        /// Load under the derived module name and call its main() function
        #[arg(long)]
        run_main: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("failed to load configuration")?;
    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => init_config(force),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Watch {
            script,
            run_main,
            echo,
            debug_hook,
            interval,
        } => {
            let options = WatchOptions {
                echo_output: echo,
                run_main,
                debug_hook,
            };
            watch(&settings, &script, options, interval)
        }
        Commands::Run { script, run_main } => {
            let options = WatchOptions {
                run_main,
                ..WatchOptions::default()
            };
            run_once(&settings, &script, options)
        }
    }
}

fn init_config(force: bool) -> Result<()> {
    if fs::metadata(CONFIG_FILE).is_ok() && !force {
        bail!("{CONFIG_FILE} already exists (use --force to overwrite)");
    }
    fs::write(CONFIG_FILE, toml::to_string_pretty(&Settings::default())?)?;
    println!("Wrote {CONFIG_FILE}");
    Ok(())
}

fn new_session(settings: &Settings) -> WatchSession<RhaiExecutor> {
    let cache = ModuleCache::shared();
    let slots = StreamSlots::stdio();
    let executor = RhaiExecutor::new(cache.clone(), &slots);
    WatchSession::new(executor, cache, slots, settings)
}

/// The reference external collaborator: drives `tick()` at a fixed cadence
/// and displays each reload's captured lines.
fn watch(
    settings: &Settings,
    script: &Path,
    options: WatchOptions,
    interval: Option<u64>,
) -> Result<()> {
    let mut session = new_session(settings);
    session.start(script, options)?;

    let interval = interval
        .map(std::time::Duration::from_millis)
        .unwrap_or_else(|| settings.poll_interval());

    loop {
        thread::sleep(interval);
        match session.tick() {
            TickOutcome::Reloaded(capture) => {
                // With --echo the relay already streamed everything live.
                if !options.echo_output {
                    display(&capture.output, &capture.errors);
                }
            }
            TickOutcome::Stopped => break,
            TickOutcome::Idle | TickOutcome::Clean => {}
        }
    }
    Ok(())
}

fn run_once(settings: &Settings, script: &Path, options: WatchOptions) -> Result<()> {
    let mut session = new_session(settings);
    session.start(script, options)?;

    // The first tick always loads, via the forced-stale rule.
    if let TickOutcome::Reloaded(capture) = session.tick() {
        display(&capture.output, &capture.errors);
        session.stop();
        session.tick(); // let the stop take effect and evict the cache
        if !capture.errors.is_empty() {
            bail!("script reported errors");
        }
    }
    Ok(())
}

fn display(output: &[String], errors: &[String]) {
    for line in output {
        println!("{line}");
    }
    for line in errors {
        eprintln!("{line}");
    }
}
