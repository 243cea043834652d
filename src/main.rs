//! `maia_daq` command line.
//!
//! - `run`: import a plan and run it against the simulated stage
//! - `validate`: import a plan and list it
//! - `worker`: process-isolated scan worker (spawned by `run --isolation process`)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use maia_daq::executor::SimulatedExecutor;
use maia_daq::messages::encode_line;
use maia_daq::monitor::MonitorEvent;
use maia_daq::scan::import::import_path;
use maia_daq::scan::ScanRequest;
use maia_daq::worker::process::serve_stdio;
use maia_daq::{logging, Controller, IsolationMode, ItemOutcome, Settings, WorkerSpawn};

#[derive(Parser, Debug)]
#[command(name = "maia_daq")]
#[command(about = "Queue and run MAIA raster scans")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a plan and run it
    Run {
        /// CSV plan file
        #[arg(short, long, value_name = "CSV")]
        plan: PathBuf,

        /// TOML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the configured worker isolation
        #[arg(short, long, value_enum)]
        isolation: Option<IsolationMode>,
    },

    /// Import a plan and list it without running
    Validate {
        /// CSV plan file
        #[arg(short, long, value_name = "CSV")]
        plan: PathBuf,
    },

    /// Serve scan commands on stdin/stdout
    #[command(hide = true)]
    Worker {
        /// Shared run state file created by the controller
        #[arg(long, value_name = "FILE")]
        run_state: PathBuf,

        /// Settings as JSON
        #[arg(long, value_name = "JSON")]
        settings: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            config,
            isolation,
        } => {
            let mut settings =
                Settings::load(config.as_deref()).context("Failed to load configuration")?;
            if let Some(mode) = isolation {
                settings.worker.isolation = mode;
            }
            logging::init(&settings.application);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build runtime")?;
            runtime.block_on(run_plan(&plan, settings))
        }
        Commands::Validate { plan } => {
            let settings = Settings::load(None).context("Failed to load configuration")?;
            logging::init(&settings.application);
            validate_plan(&plan)
        }
        Commands::Worker {
            run_state,
            settings,
        } => {
            let settings: Settings =
                serde_json::from_str(&settings).context("Invalid worker settings")?;
            logging::init(&settings.application);
            serve_stdio(&run_state, &settings).context("Scan worker failed")
        }
    }
}

async fn run_plan(path: &Path, settings: Settings) -> Result<()> {
    let requests = import_path(path).with_context(|| format!("Failed to import {}", path.display()))?;
    if requests.is_empty() {
        warn!(plan = %path.display(), "Plan is empty; nothing to run");
        return Ok(());
    }

    let spawn = match settings.worker.isolation {
        IsolationMode::Thread => {
            WorkerSpawn::Thread(Box::new(SimulatedExecutor::factory(settings.executor.clone())))
        }
        IsolationMode::Process => {
            let program = match &settings.worker.program {
                Some(program) => program.clone(),
                None => std::env::current_exe().context("Cannot locate worker executable")?,
            };
            WorkerSpawn::Process {
                program,
                settings: settings.clone(),
            }
        }
    };

    let mut controller = Controller::start(&settings, spawn).context("Failed to start worker")?;
    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MonitorEvent::Status(event)) => match encode_line(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Cannot encode status event: {}", e),
                },
                Ok(MonitorEvent::Disconnected) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Status printer fell behind")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    for request in requests {
        controller.queue_mut().enqueue(request);
    }
    info!(items = controller.queue().len(), isolation = ?settings.worker.isolation, "Starting run");

    if !controller.run().context("Cannot start run")? {
        bail!("Run was rejected");
    }
    let outcome = controller.wait_for_run().await;
    let shutdown = controller.shutdown().await;
    if let Err(e) = printer.await {
        warn!("Status printer failed: {}", e);
    }

    let report = match outcome {
        Some(result) => result.context("Run aborted")?,
        None => bail!("Run did not start"),
    };
    shutdown.context("Worker did not shut down cleanly")?;

    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Completed => eprintln!("  ok      {}", item.name),
            ItemOutcome::Failed { error, .. } => eprintln!("  FAILED  {}: {}", item.name, error),
        }
    }
    eprintln!(
        "{} completed, {} failed, {} not run",
        report.completed(),
        report.failed(),
        report.undispatched.len()
    );
    Ok(())
}

fn validate_plan(path: &Path) -> Result<()> {
    let requests = import_path(path).with_context(|| format!("Failed to import {}", path.display()))?;
    for (index, request) in requests.iter().enumerate() {
        println!("{:>3}  {}", index + 1, describe(request));
    }
    println!("{} scan(s)", requests.len());
    Ok(())
}

fn describe(request: &ScanRequest) -> String {
    let (x0, x1, xp) = request.x_axis();
    let (y0, y1, yp) = request.y_axis();
    format!(
        "{:<20} x {}..{} ({}) y {}..{} ({}) dwell {}s",
        request.name(),
        x0,
        x1,
        xp,
        y0,
        y1,
        yp,
        request.dwell()
    )
}
