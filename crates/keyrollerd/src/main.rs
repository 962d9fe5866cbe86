// # keyrollerd - Key Rotation Daemon
//
// Thin integration layer around keyroller-core:
// 1. Reads the TOML configuration file
// 2. Initializes tracing
// 3. Wires the PowerDNS API client and the file state store into the engine
// 4. Runs the engine until a shutdown signal
//
// All rollover logic lives in keyroller-core; this binary only does wiring.
//
// ## Configuration
//
// The config file path comes from `KEYROLLER_CONFIG` (default
// `/etc/keyroller/keyroller.toml`):
//
// ```toml
// log_level = "info"
// api_url = "http://127.0.0.1:8084/api/v1/servers/localhost"
// api_key = "secret"
// timeout_secs = 2
// state_path = "/var/lib/keyroller/state.json"
// poll_interval_secs = 5
// domains = ["example.com", "example.org"]
//
// [roll]
// propagation_delay_secs = 300
// dnskey_ttl_secs = 3600
// rotation_interval_secs = 2592000
// retry_backoff_secs = 30
// max_retry_backoff_secs = 3600
// ```
//
// ## Signals
//
// - SIGTERM / SIGINT: finish the current tick, persist state, exit
// - SIGHUP: reload the configuration file
//
// ## Maintenance
//
// Set `KEYROLLER_PRUNE_ORPHANS=1` to drop persisted statuses for zones
// no longer configured, once, at startup.

use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use keyroller_core::{FileStateStore, RollerConfig, RollerEngine};
use keyroller_api_pdns::PowerDnsApi;

/// Default location of the configuration file
const DEFAULT_CONFIG_PATH: &str = "/etc/keyroller/keyroller.toml";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum RollerExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<RollerExitCode> for ExitCode {
    fn from(code: RollerExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config_path = PathBuf::from(
        env::var("KEYROLLER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    // Load configuration; an unreadable or unparseable file is fatal here
    let config = match RollerConfig::load_from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return RollerExitCode::ConfigError.into();
        }
    };

    // Initialize tracing; the level string has already been repaired to a
    // valid value during load
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RollerExitCode::ConfigError.into();
    }

    info!("Starting keyrollerd");
    info!(
        "Configuration loaded from {}: {} zone(s)",
        config_path.display(),
        config.domains.len()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RollerExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config, config_path).await {
            Ok(()) => RollerExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {}", e);
                RollerExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: RollerConfig, config_path: PathBuf) -> Result<()> {
    let api = PowerDnsApi::new(
        config.api_url.as_str(),
        config.api_key.as_str(),
        config.timeout(),
    )?;
    let store = FileStateStore::new(&config.state_path);

    for zone in &config.domains {
        info!("Managing zone: {}", zone);
    }

    let (mut engine, mut events) =
        RollerEngine::new(Box::new(api), Box::new(store), config, Some(config_path)).await?;

    // Drain engine events into the log so the bounded channel never fills
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(?event, "engine event");
        }
    });

    if prune_requested() {
        let removed = engine.prune_orphans().await?;
        info!("Pruned {} orphaned zone status(es)", removed.len());
    }

    info!("Starting rollover engine");
    engine.run().await?;

    Ok(())
}

/// Whether the operator asked for orphan cleanup at startup
fn prune_requested() -> bool {
    matches!(
        env::var("KEYROLLER_PRUNE_ORPHANS").as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
