// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lora_gateway::codec::{CompressConfig, Transforms, XorCipher};
use lora_gateway::config::{DeviceKind, GatewayConfig};
use lora_gateway::driver::{
    L072ZDriver, LoStickDriver, ModemDriver, Rak811Driver, RadioRxConfig, RadioTxConfig, SerialHandle,
};
use lora_gateway::engine::{GatewayEngine, StaticArpTable};
use lora_gateway::hostos::{HostInterface, RawSocketEgressSource, RawSocketIngressSink};
use lora_gateway::stats::GatewayStats;

#[derive(Parser)]
#[command(name = "lora-gateway", version, about = "IP-over-LoRa gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity; overrides RUST_LOG when set.
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the gateway daemon (the default when no subcommand is given).
    Run,
    /// Validates a configuration file and exits.
    Validate,
    /// Prints a commented default configuration to stdout.
    GenConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = cli
        .log_level
        .clone()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::GenConfig => {
            print!("{}", default_config_toml());
            Ok(())
        }
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Run => cmd_run(&cli.config),
    }
}

fn default_config_toml() -> &'static str {
    r#"# lora-gateway configuration
device = "RAK811"          # B-L072Z-LRWAN1, RAK811, or LoStick
tty = "/dev/ttyUSB0"
ip_address = "10.0.0.5"
channel_tx = 868100000
channel_rx = 868100000
tx_power = 14
bandwidth = 0               # 0/1/2 -> 125/250/500 kHz
sf = 7
coderate = 1                 # 1..4 -> 4/5..4/8
preamble_len = 8
max_lora_framesz = 64
mtu = 230
rohc_compression = false
# compress_mode = "zlib"
# cipher_mode = "xor"
# cipher_key = "change-me"
"#
}

fn cmd_validate(config_path: &Option<PathBuf>) -> Result<()> {
    let path = config_path
        .clone()
        .context("--config is required for the validate subcommand")?;
    let config = GatewayConfig::from_file(&path).context("failed to load configuration")?;
    info!(device = ?config.device, addr = config.lora_address()?, "configuration is valid");
    Ok(())
}

fn cmd_run(config_path: &Option<PathBuf>) -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        bail!("lora-gateway must run as root (raw sockets, interface creation)");
    }

    let path = config_path.clone().context("--config is required to run the gateway")?;
    let config = GatewayConfig::from_file(&path).context("failed to load configuration")?;
    let local_addr = config.lora_address()?;

    let tx = radio_tx_config(&config);
    let rx = radio_rx_config(&config);
    let transforms = build_transforms(&config)?;

    let port = SerialHandle(
        serialport::new(&config.tty, 115_200)
            .timeout(Duration::from_millis(200))
            .open()
            .with_context(|| format!("failed to open serial port {}", config.tty))?,
    );

    let driver: Box<dyn ModemDriver> = match config.device {
        DeviceKind::L072Z => Box::new(L072ZDriver::new(port, tx, rx, config.max_lora_framesz)),
        DeviceKind::Rak811 => Box::new(Rak811Driver::new(port, tx, rx, config.max_lora_framesz)),
        DeviceKind::LoStick => Box::new(LoStickDriver::new(port, tx, rx, config.max_lora_framesz)),
    };
    let mut driver = driver;
    driver.init().context("modem init failed")?;

    let host = HostInterface::new(local_addr);
    host.setup(config.ip_address.parse().context("invalid ip_address")?, config.mtu)
        .context("failed to set up synthetic interface")?;

    let stats = GatewayStats::new();
    let arp: Arc<dyn lora_gateway::engine::ArpTable> = Arc::new(StaticArpTable::new(local_addr));
    let engine = Arc::new(GatewayEngine::with_rohc(
        driver,
        local_addr,
        config.max_lora_framesz,
        transforms,
        config.rohc_compression,
        arp,
        stats.clone(),
    ));

    let stop_engine = engine.clone();
    ctrlc::set_handler(move || {
        info!("received SIGINT, shutting down");
        stop_engine.shutdown();
    })
    .context("failed to install SIGINT handler")?;

    let egress_engine = engine.clone();
    let iface = host.iface_name().to_string();
    let egress_handle = std::thread::spawn(move || match RawSocketEgressSource::new(&iface) {
        Ok(source) => egress_engine.run_egress_queue(source),
        Err(err) => warn!(%err, "failed to open egress source"),
    });

    let ingress_engine = engine.clone();
    let ingress_handle = std::thread::spawn(move || match RawSocketIngressSink::new() {
        Ok(sink) => ingress_engine.run_ingress_poll(sink),
        Err(err) => warn!(%err, "failed to open ingress sink"),
    });

    let maintenance_engine = engine.clone();
    let maintenance_handle = if matches!(config.device, DeviceKind::L072Z) {
        Some(std::thread::spawn(move || {
            maintenance_engine.run_driver_maintenance(lora_gateway::driver::keepalive_period())
        }))
    } else {
        None
    };

    let _ = egress_handle.join();
    let _ = ingress_handle.join();
    if let Some(handle) = maintenance_handle {
        let _ = handle.join();
    }

    host.teardown();

    let snapshot = stats.snapshot();
    info!(
        frames_tx = snapshot.frames_tx,
        frames_rx_ok = snapshot.frames_rx_ok,
        frames_rx_dropped = snapshot.frames_rx_dropped,
        resync_steps = snapshot.resync_steps,
        datagrams_egress = snapshot.datagrams_egress,
        datagrams_ingress = snapshot.datagrams_ingress,
        "final stats"
    );
    Ok(())
}

fn radio_tx_config(config: &GatewayConfig) -> RadioTxConfig {
    RadioTxConfig {
        channel_hz: config.channel_tx,
        bandwidth_index: config.bandwidth,
        spreading_factor: config.sf,
        coderate_index: config.coderate,
        preamble_len: config.preamble_len,
        power_dbm: config.tx_power,
        explicit_header: true,
        crc_on: false,
        iq_inverted: false,
        timeout_ms: 3000,
    }
}

fn radio_rx_config(config: &GatewayConfig) -> RadioRxConfig {
    RadioRxConfig {
        channel_hz: config.channel_rx,
        bandwidth_index: config.bandwidth,
        spreading_factor: config.sf,
        coderate_index: config.coderate,
        preamble_len: config.preamble_len,
        symb_timeout: 5,
        explicit_header: true,
        crc_on: false,
        iq_inverted: false,
        continuous_rx: true,
    }
}

fn build_transforms(config: &GatewayConfig) -> Result<Transforms> {
    let compress = match config.compress_mode.as_deref() {
        Some("zlib") => Some(CompressConfig::default()),
        Some(other) => bail!("unsupported compress_mode: {other}"),
        None => None,
    };

    let cipher = match config.cipher_mode.as_deref() {
        Some("xor") => {
            let key = config
                .cipher_key
                .clone()
                .context("cipher_mode=xor requires cipher_key")?;
            Some(XorCipher::new(key.into_bytes()))
        }
        Some(other) => bail!("unsupported cipher_mode: {other}"),
        None => None,
    };

    Ok(Transforms { compress, cipher })
}
