#![forbid(unsafe_code)]

mod commands;
mod runtime;

use std::fs::File;
use std::io::{self, BufRead, BufReader, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use fileq_core::settings_io::{default_settings_path, load_settings, save_settings};
use fileq_core::{SchedulerKind, Settings};
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, parse_line};
use crate::runtime::Session;

#[derive(Debug, Parser)]
#[command(version, about = "Queued file operations with undo and redo")]
struct Cli {
    /// Settings file; defaults to ~/.config/fileq/settings.ini.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Trash directory to use instead of the home trash.
    #[arg(long)]
    trash_dir: Option<PathBuf>,
    #[arg(long)]
    history_depth: Option<usize>,
    /// Tokio worker threads; implies the runtime job scheduler.
    #[arg(long)]
    threads: Option<usize>,
    /// Read commands from a file instead of stdin.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_config: bool,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(default_settings_path);
    let mut settings = match config_path.as_deref() {
        Some(path) => load_settings(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    apply_overrides(&mut settings, &cli);
    tracing::debug!(?settings, "effective settings");

    if cli.save_config {
        let path = config_path
            .as_deref()
            .ok_or_else(|| anyhow!("no settings path; pass --config"))?;
        save_settings(path, &settings)
            .with_context(|| format!("failed to save settings to {}", path.display()))?;
    }

    let runtime = build_runtime(settings.worker_threads)?;
    let mut session = {
        let _guard = runtime.enter();
        Session::new(&settings)?
    };

    let interactive = cli.script.is_none() && io::stdin().is_terminal();
    let input: Box<dyn BufRead> = match cli.script.as_deref() {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let result = run_shell(&runtime, &mut session, input, interactive);
    for line in runtime.block_on(session.wait_background()) {
        println!("{line}");
    }
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FILEQ_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("fileq=info,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .without_time()
        .try_init();
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(trash_dir) = cli.trash_dir.as_ref() {
        settings.trash_dir = Some(trash_dir.clone());
    }
    if let Some(depth) = cli.history_depth {
        settings.history_depth = depth.max(1);
    }
    if let Some(threads) = cli.threads {
        settings.worker_threads = Some(threads.max(1));
        settings.scheduler = SchedulerKind::Runtime;
    }
}

fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }
    builder
        .thread_name("fileq-runtime")
        .build()
        .map_err(|error| anyhow!("failed to build runtime: {error}"))
}

fn run_shell(
    runtime: &tokio::runtime::Runtime,
    session: &mut Session,
    input: Box<dyn BufRead>,
    interactive: bool,
) -> Result<()> {
    prompt(interactive)?;
    for line in input.lines() {
        let line = line.context("failed to read command")?;
        for finished in session.drain_finished() {
            println!("{finished}");
        }

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(parsed)) if parsed.command == Command::Quit => break,
            Ok(Some(parsed)) => match runtime.block_on(session.execute(parsed)) {
                Ok(output) if output.is_empty() => {}
                Ok(output) => println!("{output}"),
                Err(error) => eprintln!("error: {error:#}"),
            },
            Err(error) => eprintln!("error: {error:#}"),
        }
        prompt(interactive)?;
    }
    Ok(())
}

fn prompt(interactive: bool) -> Result<()> {
    if interactive {
        print!("fileq> ");
        io::stdout().flush().context("failed to flush prompt")?;
    }
    Ok(())
}
