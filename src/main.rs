//! rpi-tracker
//!
//! Tracks Research → Plan → Implement projects: reads commits or event
//! files, scores them against task criteria and keeps the status graph,
//! history and reports current.

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use rpi_tracker::cli::export::ExportArgs;
use rpi_tracker::cli::{AckArgs, Cli, Command, DecideArgs, InitArgs, UpdateArgs};
use rpi_tracker::clock::SystemClock;
use rpi_tracker::config::{Config, ConfigLoader};
use rpi_tracker::db::{Database, ProjectStore, now_ms};
use rpi_tracker::export::{ProjectExport, is_export_path};
use rpi_tracker::format::{self, OutputFormat};
use rpi_tracker::graph::Transition;
use rpi_tracker::logging::{self, LogTarget};
use rpi_tracker::plan::load_plan;
use rpi_tracker::report::Reporter;
use rpi_tracker::source::{EventSource, GitEventSource, JsonlEventSource};
use rpi_tracker::tracker::Tracker;
use rpi_tracker::types::TaskStatus;
use std::io::Write;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    // SAFETY: This is safe at program startup before any other threads are spawned
    if let Some(config_path) = &cli.config {
        unsafe {
            std::env::set_var("RPI_TRACKER_CONFIG_PATH", config_path);
        }
    }
    let mut loader = ConfigLoader::load()?;
    if let Some(path) = loader.config_path() {
        debug!(path = %path.display(), "loaded config");
    }
    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.storage.db_path = db_path.into();
    }
    let config = loader.into_config();

    config.ensure_db_dir()?;
    let db = Database::open(&config.storage.db_path)?;
    let output: OutputFormat = cli.format.into();

    match cli.command {
        Command::Init(args) => run_init(db, &config, args),
        Command::Update(args) => run_update(open(db, &config)?, args, output),
        Command::Status => {
            let tracker = open(db, &config)?;
            let report = tracker.report(&SystemClock);
            emit(output, &report, || format::format_report_markdown(&report))
        }
        Command::Next { limit } => {
            let tracker = open(db, &config)?;
            let mut reporter = Reporter::new(&config.report);
            if let Some(limit) = limit {
                reporter = reporter.with_limit(limit);
            }
            let next = reporter.next_tasks(&tracker.snapshot());
            emit(output, &next, || format::format_next_markdown(&next))
        }
        Command::Pending => {
            let project = open(db, &config)?.snapshot();
            emit(output, &project.pending, || {
                format::format_pending_markdown(&project.pending)
            })
        }
        Command::Decide(args) => run_decide(open(db, &config)?, args, output),
        Command::SetStatus { task_id, status } => {
            run_set_status(open(db, &config)?, &task_id, status, output)
        }
        Command::History { id: None } => {
            let history = db.list_history()?;
            emit(output, &history, || format::format_history_markdown(&history))
        }
        Command::History { id: Some(id) } => {
            let snapshot = db
                .list_history()?
                .into_iter()
                .find(|s| s.id == id)
                .ok_or_else(|| anyhow!("no history snapshot {}", id))?;
            emit(output, &snapshot, || format::format_snapshot_markdown(&snapshot))
        }
        Command::Unresolved => {
            let project = open(db, &config)?.snapshot();
            emit(output, &project.unresolved, || {
                format::format_unresolved_markdown(&project.unresolved)
            })
        }
        Command::Ack(args) => run_ack(open(db, &config)?, args, output),
        Command::Export(args) => run_export(open(db, &config)?, args),
    }
}

fn open(db: Database, config: &Config) -> Result<Tracker<Database>> {
    Tracker::open(db, config)
}

/// Print `value` as JSON, or the markdown rendering.
fn emit<T: serde::Serialize>(
    output: OutputFormat,
    value: &T,
    markdown: impl FnOnce() -> String,
) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", format::to_json(value)?),
        OutputFormat::Markdown => print!("{}", markdown()),
    }
    Ok(())
}

fn run_init(db: Database, config: &Config, args: InitArgs) -> Result<()> {
    let project = if is_export_path(&args.plan) {
        ProjectExport::from_file(&args.plan)?.project
    } else {
        load_plan(&args.plan)?
    };
    if db.load()?.is_some() {
        if !args.force {
            bail!(
                "a project already exists in {}; pass --force to replace it",
                config.storage.db_path.display()
            );
        }
        warn!("replacing existing project and history");
        db.reset()?;
    }

    let tracker = Tracker::initialize(db, config, project)?;
    let snapshot = tracker.snapshot();
    eprintln!(
        "Initialized {} epics, {} tasks from {}",
        snapshot.epics.len(),
        snapshot.tasks().count(),
        args.plan.display()
    );
    Ok(())
}

fn run_update(tracker: Tracker<Database>, args: UpdateArgs, output: OutputFormat) -> Result<()> {
    let source: Box<dyn EventSource> = match (args.events, args.git) {
        (Some(path), _) => Box::new(JsonlEventSource::new(path)),
        (None, git) => {
            let mut source = GitEventSource::new(git.unwrap_or_else(|| ".".into()));
            if let Some(n) = args.max_count {
                source = source.with_max_count(n);
            }
            Box::new(source)
        }
    };

    let report = tracker.update(source.as_ref())?;
    if let Some(err) = report.stale_error() {
        info!(error = %err, "no new events");
    }
    emit(output, &report, || format::format_batch_markdown(&report))
}

fn run_decide(tracker: Tracker<Database>, args: DecideArgs, output: OutputFormat) -> Result<()> {
    let outcome = tracker.decide(args.decision_id, args.response())?;
    emit(output, &outcome, || {
        format!(
            "Decision {} for {}: {:?}\n",
            outcome.decision_id, outcome.task_id, outcome.action
        )
    })
}

fn run_ack(tracker: Tracker<Database>, args: AckArgs, output: OutputFormat) -> Result<()> {
    let event_id = if args.all { None } else { args.event_id.as_deref() };
    let removed = tracker.acknowledge(event_id)?;
    emit(output, &removed, || {
        format!("Acknowledged {} unresolved events\n", removed.len())
    })
}

fn run_set_status(
    tracker: Tracker<Database>,
    task_id: &str,
    status: TaskStatus,
    output: OutputFormat,
) -> Result<()> {
    let transition = tracker.set_status(task_id, status, now_ms())?;
    emit(output, &transition, || match transition {
        Transition::Unchanged => format!("{} already {}\n", task_id, status),
        Transition::Changed { from, to } => format!("{}: {} → {}\n", task_id, from, to),
    })
}

fn run_export(tracker: Tracker<Database>, args: ExportArgs) -> Result<()> {
    let mut project = tracker.snapshot().as_ref().clone();
    if args.no_history {
        project.history.clear();
    }
    let export = ProjectExport::new(project);
    let json_len = export.to_json_pretty()?.len() as u64;
    let compress = args.should_compress(json_len);
    let bytes = export.to_bytes(compress)?;

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &bytes)?;
            eprintln!(
                "Exported to {}{}",
                path.display(),
                if compress { " (gzipped)" } else { "" }
            );
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(&bytes)?;
            lock.flush()?;
        }
    }
    Ok(())
}
