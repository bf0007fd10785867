//! bikepowerd - The bikepower service
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - Access engine
//! - Background expiry sweep
//!
//! `serve` runs the sweep for the lifetime of the process. The other
//! subcommands are one-shot calls into the same engine and database, for
//! operators and for the payment front end.

use anyhow::{Context, Result};
use bikepower_api::{AccessStatus, PowerState, VehicleProfile};
use bikepower_config::{load_config_or_default, Policy};
use bikepower_core::{AccessEngine, AccessError, Sweeper};
use bikepower_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use bikepower_util::{
    default_config_path, format_datetime_full, format_duration, is_mock_time_active,
    Plate, SystemClock, BIKEPOWER_CONFIG_ENV, BIKEPOWER_DATA_DIR_ENV, DATABASE_FILENAME,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for a plate that is not registered
const EXIT_NOT_FOUND: u8 = 2;

/// bikepowerd - Prepaid power access for vehicles
#[derive(Parser, Debug)]
#[command(name = "bikepowerd")]
#[command(about = "Prepaid power access enforcement for vehicles", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/bikepower/config.toml)
    #[arg(short, long, global = true, env = BIKEPOWER_CONFIG_ENV, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set BIKEPOWER_DATA_DIR env var)
    #[arg(short, long, global = true, env = BIKEPOWER_DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the expiry sweep until interrupted (default)
    Serve,

    /// Register a new vehicle, unpowered
    Register {
        plate: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        id_number: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        photo_url: Option<String>,
    },

    /// Record a payment and power the vehicle on
    Pay { plate: String },

    /// Show a vehicle's power state
    Status { plate: String },

    /// Run one expiry pass now
    Sweep,

    /// Show recent audit events
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

/// Everything a command needs
struct App {
    policy: Policy,
    store: Arc<dyn Store>,
    engine: Arc<AccessEngine>,
    json: bool,
}

impl App {
    fn open(args: &Args) -> Result<Self> {
        let policy = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let engine = Arc::new(AccessEngine::new(policy.access, store.clone()));

        Ok(Self {
            policy,
            store,
            engine,
            json: args.json,
        })
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }

    async fn serve(self) -> Result<ExitCode> {
        let access = self.policy.access;

        self.audit(AuditEventType::ServiceStarted);
        self.audit(AuditEventType::ConfigLoaded {
            grant_duration_secs: access.grant_duration.as_secs(),
            sweep_interval_secs: access.sweep_interval.as_secs(),
        });

        let sweeper = Sweeper::new(
            self.engine.clone(),
            Arc::new(SystemClock),
            access.sweep_interval,
        )
        .start();

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        info!(
            grant = %format_duration(access.grant_duration),
            sweep_interval = %format_duration(access.sweep_interval),
            "Service running"
        );

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
        }

        sweeper.stop().await;
        self.audit(AuditEventType::ServiceStopped);

        info!("Shutdown complete");
        Ok(ExitCode::SUCCESS)
    }

    fn register(&self, plate: Plate, profile: VehicleProfile) -> Result<ExitCode> {
        match self.engine.register_vehicle(plate, profile, bikepower_util::now()) {
            Ok(record) => {
                self.emit(&record, || format!("{} registered (power OFF)", record.plate))?;
                Ok(ExitCode::SUCCESS)
            }
            Err(e @ AccessError::Conflict(_)) => {
                eprintln!("{}", e);
                Ok(ExitCode::FAILURE)
            }
            Err(e) => Err(e).context("Registration failed"),
        }
    }

    fn pay(&self, plate: Plate) -> Result<ExitCode> {
        match self.engine.record_payment(&plate, bikepower_util::now()) {
            Ok(record) => {
                let status = record.status();
                self.emit(&status, || describe_status(&status))?;
                Ok(ExitCode::SUCCESS)
            }
            Err(e @ AccessError::NotFound(_)) => {
                eprintln!("{}", e);
                Ok(ExitCode::from(EXIT_NOT_FOUND))
            }
            Err(e) => Err(e).context("Payment failed"),
        }
    }

    fn status(&self, plate: Plate) -> Result<ExitCode> {
        let status = self
            .engine
            .query_status(&plate, bikepower_util::now())
            .context("Status query failed")?;

        match status {
            Some(status) => {
                self.emit(&status, || describe_status(&status))?;
                Ok(ExitCode::SUCCESS)
            }
            None => {
                if self.json {
                    println!("null");
                }
                eprintln!("No vehicle registered with plate {}", plate);
                Ok(ExitCode::from(EXIT_NOT_FOUND))
            }
        }
    }

    fn sweep(&self) -> Result<ExitCode> {
        let report = self
            .engine
            .sweep(bikepower_util::now())
            .context("Sweep failed")?;

        self.emit(&report, || {
            format!(
                "scanned {}, deactivated {}, skipped {}, failed {}",
                report.scanned, report.deactivated, report.skipped, report.failed
            )
        })?;

        if report.failed > 0 {
            Ok(ExitCode::FAILURE)
        } else {
            Ok(ExitCode::SUCCESS)
        }
    }

    fn history(&self, limit: usize) -> Result<ExitCode> {
        let events = self
            .store
            .get_recent_audits(limit)
            .context("Failed to read audit log")?;

        self.emit(&events, || {
            events
                .iter()
                .map(|e| format!("{}  {}", format_datetime_full(&e.timestamp), describe_event(&e.event)))
                .collect::<Vec<_>>()
                .join("\n")
        })?;

        Ok(ExitCode::SUCCESS)
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

fn describe_status(status: &AccessStatus) -> String {
    match (status.power_state, status.expires_at) {
        (PowerState::On, Some(expires_at)) => {
            format!("{}: ON until {}", status.plate, format_datetime_full(&expires_at))
        }
        (PowerState::Off, Some(expires_at)) => {
            format!("{}: OFF (expired {})", status.plate, format_datetime_full(&expires_at))
        }
        (state, None) => format!("{}: {}", status.plate, state),
    }
}

fn describe_event(event: &AuditEventType) -> String {
    match event {
        AuditEventType::ServiceStarted => "service started".into(),
        AuditEventType::ServiceStopped => "service stopped".into(),
        AuditEventType::ConfigLoaded {
            grant_duration_secs,
            sweep_interval_secs,
        } => format!(
            "config loaded (grant {}s, sweep every {}s)",
            grant_duration_secs, sweep_interval_secs
        ),
        AuditEventType::VehicleRegistered { plate } => format!("{} registered", plate),
        AuditEventType::PaymentRecorded {
            plate,
            payment_id,
            expires_at,
        } => format!(
            "{} paid ({}), on until {}",
            plate,
            payment_id,
            format_datetime_full(expires_at)
        ),
        AuditEventType::PowerCut { plate, trigger, .. } => {
            format!("{} power off ({})", plate, trigger)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr so command output stays parseable
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if is_mock_time_active() {
        warn!(now = %bikepower_util::now(), "Mock time is active");
    }

    let app = App::open(&args)?;

    match args.command.unwrap_or(Cmd::Serve) {
        Cmd::Serve => {
            info!(version = env!("CARGO_PKG_VERSION"), "bikepowerd starting");
            app.serve().await
        }
        Cmd::Register {
            plate,
            name,
            id_number,
            model,
            phone,
            photo_url,
        } => app.register(
            Plate::new(plate),
            VehicleProfile {
                full_name: name,
                id_number,
                vehicle_model: model,
                phone,
                photo_url,
            },
        ),
        Cmd::Pay { plate } => app.pay(Plate::new(plate)),
        Cmd::Status { plate } => app.status(Plate::new(plate)),
        Cmd::Sweep => app.sweep(),
        Cmd::History { limit } => app.history(limit),
    }
}
