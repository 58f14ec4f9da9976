//! ocpp-station — OCPP 1.6-J / 2.0.1 charge-point client.
//!
//! Reads configuration from TOML (`~/.config/ocpp-station/config.toml` by
//! default), wires the synchronous core (`ocpp_station::Context`) to a
//! WebSocket uplink and a sandboxed filesystem, and drives `Context::tick`
//! on a fixed interval until interrupted.
//!
//! The hardware-facing I/O glue (contactor, EV-ready signal, energy meter) is
//! explicitly out of scope for this crate (`spec.md` §1); this binary drives
//! the core against `NoopHardwareIo` as a reference wiring. A real deployment
//! substitutes its own `ports::HardwareIo` implementation at this call site.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use ocpp_station::application::availability_service::AvailabilityService;
use ocpp_station::application::boot_service::{BootService, ChargePointIdentity};
use ocpp_station::application::config_store::ConfigurationStore;
use ocpp_station::application::engine::Engine;
use ocpp_station::application::local_auth_service::LocalAuthService;
use ocpp_station::application::metering_service::{MeteringService, MeteringServiceConfig};
use ocpp_station::application::operations::registry::OperationRegistry;
use ocpp_station::application::queue::RequestQueue;
use ocpp_station::application::smart_charging_service::{SmartChargingService, SmartChargingServiceConfig};
use ocpp_station::application::transaction_service::{TransactionService, TransactionServiceConfig};
use ocpp_station::context::Context;
use ocpp_station::domain::BootStats;
use ocpp_station::infrastructure::{
    AppConfig, OcppSubProtocol, SandboxedFileStore, Sha256CertificateHasher, SystemClockSource, WsConnection,
};
use ocpp_station::ports::{ClockSource, FileStore, NoopHardwareIo};
use ocpp_station::support::json_pool::JsonPool;

const BOOTSTATS_FILE: &str = "bootstats.jsn";
const CONFIG_CONTAINER: &str = "arduino-ocpp.cnf";
const JSON_POOL_MAX_DOCUMENT_BYTES: usize = 16 * 1024;
const JSON_POOL_PREALLOCATE: usize = 4;
const TX_RECORD_SIZE_PER_CONNECTOR: usize = 8;

/// OCPP 1.6-J / 2.0.1 charge-point client.
#[derive(Parser, Debug)]
#[command(name = "ocpp-station", version, about = "OCPP charge-point client core")]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_STATION_CONFIG")]
    config: Option<PathBuf>,

    /// Override the CSMS WebSocket URL from the config file.
    #[arg(long)]
    csms_url: Option<String>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without connecting.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(ocpp_station::infrastructure::config::default_config_path);

    let mut config = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            init_tracing(&cfg);
            info!(path = %config_path.display(), "configuration loaded");
            cfg
        }
        Err(err) => {
            init_tracing(&AppConfig::default());
            warn!(path = %config_path.display(), %err, "failed to load configuration; using defaults");
            AppConfig::default()
        }
    };

    if let Some(url) = cli.csms_url {
        config.csms.url = url;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if cli.check {
        println!("configuration is valid");
        println!("  charge point : {} {}", config.charge_point.vendor, config.charge_point.model);
        println!("  connectors   : {:?}", config.charge_point.connector_ids);
        println!("  csms url     : {}", config.csms.url);
        println!("  state dir    : {}", config.storage.state_dir.display());
        return Ok(());
    }

    let mut fs = SandboxedFileStore::new(&config.storage.state_dir)?;
    let boot_stats = load_or_initialize_boot_stats(&mut fs);
    fs.write_json(BOOTSTATS_FILE, &boot_stats)?;

    let identity = ChargePointIdentity {
        vendor: config.charge_point.vendor.clone(),
        model: config.charge_point.model.clone(),
        serial_number: config.charge_point.serial_number.clone(),
        firmware_version: config.charge_point.firmware_version.clone(),
    };
    let connector_ids = config.charge_point.connector_ids.clone();

    let registry = OperationRegistry::new();
    let json_pool = JsonPool::new(JSON_POOL_MAX_DOCUMENT_BYTES, JSON_POOL_PREALLOCATE);
    let queue = RequestQueue::new(TX_RECORD_SIZE_PER_CONNECTOR);
    let engine = Engine::new(registry, json_pool, queue);

    let boot = BootService::new(identity, boot_stats, false);
    let transactions = TransactionService::new(&connector_ids, TransactionServiceConfig::default());
    let metering = MeteringService::new(MeteringServiceConfig::default());
    let smart_charging = SmartChargingService::new(SmartChargingServiceConfig::default());
    let availability = AvailabilityService::new();
    let local_auth = LocalAuthService::new(true, false);

    let mut context = Context::new(
        ConfigurationStore::new(),
        boot,
        engine,
        transactions,
        metering,
        smart_charging,
        availability,
        local_auth,
        Box::new(Sha256CertificateHasher),
        connector_ids,
    );
    context.load(&mut fs, &[CONFIG_CONTAINER]);

    let sub_protocol = if config.csms.use_ocpp_2_0_1 { OcppSubProtocol::V201 } else { OcppSubProtocol::V16 };
    let mut connection = WsConnection::connect(config.csms.url.clone(), sub_protocol);
    let mut hardware = NoopHardwareIo::new();
    let clock_source = SystemClockSource::new();

    info!(url = %config.csms.url, sub_protocol = ?sub_protocol, "starting OCPP core loop");

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(config.storage.tick_interval_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_ms = clock_source.now_ms();
                context.tick(&mut connection, &mut hardware, &mut fs, now_ms);
            }
            result = &mut shutdown => {
                if let Err(err) = result {
                    error!(%err, "failed to install Ctrl-C handler");
                }
                break;
            }
        }
    }

    info!("shutdown requested; persisting boot stats and exiting");
    if let Err(err) = fs.write_json(BOOTSTATS_FILE, context.boot_stats()) {
        error!(%err, "failed to persist bootstats.jsn on shutdown");
    }

    Ok(())
}

/// Loads `bootstats.jsn` if present, otherwise starts fresh; either way bumps
/// `bootNr` for this boot (`spec.md` §4.I). Survival past
/// `MO_BOOTSTATS_LONGTIME_MS` is tracked by `BootService::on_tick` and
/// persisted again at shutdown.
fn load_or_initialize_boot_stats(fs: &mut SandboxedFileStore) -> BootStats {
    match fs.read_json::<BootStats>(BOOTSTATS_FILE) {
        Ok(previous) => previous.next_boot(),
        Err(_) => BootStats::first_boot(env!("CARGO_PKG_VERSION")),
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
