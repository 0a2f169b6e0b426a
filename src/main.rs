use clap::Parser;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use editstamp::{
    batch::{BatchMode, BatchProgress, BatchReport, BatchRunner},
    cli::{Cli, Command, OutputFormat},
    filter::ExcalidrawDetector,
    store::FsVault,
    updater::Updater,
    watcher::VaultWatcher,
    ChangeOutcome, VaultEvent,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let vault_path = cli.get_vault_path();
    let settings_store = cli.settings_store();
    let settings = settings_store.load()?.from_env_overrides();
    if let Err(err) = settings.validate() {
        eprintln!("Invalid settings: {}", err);
        std::process::exit(1);
    }

    tracing::info!("Using vault: {}", vault_path.display());

    let mut updater = Updater::new(FsVault::new(&vault_path), settings, settings_store);
    if !cli.no_excalidraw {
        updater = updater.with_specialized(ExcalidrawDetector);
    }

    match cli.command() {
        Command::Watch => run_watch_mode(&cli, &mut updater)?,
        Command::UpdateAll => run_batch_mode(&cli, &mut updater, BatchMode::UpdateTimestamps)?,
        Command::PopulateCache => run_batch_mode(&cli, &mut updater, BatchMode::PopulateCache)?,
        Command::List => run_list_mode(&cli, &updater)?,
    }

    Ok(())
}

fn run_watch_mode(cli: &Cli, updater: &mut Updater<FsVault>) -> Result<()> {
    let watcher = VaultWatcher::new(updater.store())?;

    if cli.output == OutputFormat::Text {
        println!("Watching: {}", updater.store().root().display());
        println!("Press Ctrl+C to quit");
        println!("---");
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        match watcher.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let outcome = updater.handle_event(&event);
                print_event(&event, &outcome, cli)?;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

fn run_batch_mode(cli: &Cli, updater: &mut Updater<FsVault>, mode: BatchMode) -> Result<()> {
    let files = updater.get_all_eligible_files()?;

    let runner = BatchRunner::new(mode);
    let cancel = runner.cancel_handle();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })?;

    if cli.output == OutputFormat::Text {
        let action = match mode {
            BatchMode::UpdateTimestamps => "Updating timestamps of",
            BatchMode::PopulateCache => "Caching hashes of",
        };
        println!("{} {} files", action, files.len());
    }

    let report = runner.run(updater, &files, |progress| print_progress(&progress, cli));

    print_report(&report, cli)?;
    Ok(())
}

fn run_list_mode(cli: &Cli, updater: &Updater<FsVault>) -> Result<()> {
    let files = updater.get_all_eligible_files()?;

    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string(&files)?),
        OutputFormat::Text | OutputFormat::Compact => {
            for file in &files {
                println!("{}", file);
            }
        }
    }

    Ok(())
}

fn outcome_label(outcome: &ChangeOutcome) -> &'static str {
    match outcome {
        ChangeOutcome::Ok => "OK",
        ChangeOutcome::Ignored { .. } => "IGNORED",
        ChangeOutcome::Error { .. } => "ERROR",
    }
}

fn print_event(event: &VaultEvent, outcome: &ChangeOutcome, cli: &Cli) -> Result<()> {
    match cli.output {
        OutputFormat::Json => {
            let line = serde_json::json!({ "event": event, "outcome": outcome });
            println!("{}", serde_json::to_string(&line)?);
        }
        OutputFormat::Compact => print_compact_event(event, outcome),
        OutputFormat::Text => print_text_event(event, outcome, cli),
    }
    Ok(())
}

fn print_text_event(event: &VaultEvent, outcome: &ChangeOutcome, cli: &Cli) {
    let time_str = chrono::Local::now().format("%H:%M:%S");

    let (event_type, target) = match event {
        VaultEvent::Modify { path } => ("MODIFIED", path.clone()),
        VaultEvent::Rename { from, to } => ("RENAMED", format!("{} -> {}", from, to)),
        VaultEvent::Delete { path } => ("DELETED", path.clone()),
    };

    let detail = match outcome {
        ChangeOutcome::Ok => String::new(),
        ChangeOutcome::Ignored { reason } => format!(" ({})", reason),
        ChangeOutcome::Error { message, .. } => format!(": {}", message),
    };

    if cli.no_color {
        println!("[{}] {} {} {}{}", time_str, event_type, target, outcome_label(outcome), detail);
    } else {
        let color = match outcome {
            ChangeOutcome::Ok => "\x1b[32m",           // Green
            ChangeOutcome::Ignored { .. } => "\x1b[90m", // Grey
            ChangeOutcome::Error { .. } => "\x1b[31m",   // Red
        };
        println!(
            "[{}] {} {} {}{}\x1b[0m{}",
            time_str,
            event_type,
            target,
            color,
            outcome_label(outcome),
            detail
        );
    }
}

fn print_compact_event(event: &VaultEvent, outcome: &ChangeOutcome) {
    let event_type = match event {
        VaultEvent::Modify { .. } => "M",
        VaultEvent::Rename { .. } => "V",
        VaultEvent::Delete { .. } => "D",
    };

    println!("{} {} {}", event_type, event.path(), outcome_label(outcome));
}

fn print_progress(progress: &BatchProgress<'_>, cli: &Cli) {
    match cli.output {
        OutputFormat::Text => {
            eprint!("\r[{}/{}] {}\x1b[K", progress.done, progress.total, progress.path);
            if progress.done == progress.total {
                eprintln!();
            }
        }
        OutputFormat::Compact => {
            println!("{} {}", outcome_label(progress.outcome), progress.path);
        }
        OutputFormat::Json => {}
    }
}

fn print_report(report: &BatchReport, cli: &Cli) -> Result<()> {
    match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
        OutputFormat::Text | OutputFormat::Compact => {
            if report.cancelled {
                eprintln!();
                println!("Batch update stopped.");
            }
            println!(
                "Processed {}/{} files: {} ok, {} ignored, {} failed",
                report.processed,
                report.total,
                report.ok,
                report.ignored,
                report.errors.len()
            );
            for error in &report.errors {
                if let ChangeOutcome::Error { path, message } = error {
                    println!("  {}: {}", path, message);
                }
            }
        }
    }
    Ok(())
}
