//! # Mould Receiver
//!
//! Gateway/logger: recebe as linhas do sensor (central TCP ou porta serial),
//! decodifica e entrega cada registro, com timestamp de captura e faixas de
//! umidade/DPD, ao forwarder.
//!
//! A thread de I/O nunca bloqueia no processamento: a fila entre as duas é
//! limitada e descarta a linha mais antiga quando cheia.

mod gateway;
mod net_thread;

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use gateway::{Gateway, LogForwarder};
use mould_core::config::AppConfig;
use mould_core::transport::StopSignal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mould_receiver", about = "Gateway de risco de mofo")]
struct Cli {
    /// Caminho do config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Porta serial (sobrepõe receiver.serial_port e força modo serial)
    #[arg(short, long)]
    port: Option<String>,

    /// Encerra após N linhas recebidas
    #[arg(long)]
    max_lines: Option<u64>,
}

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // ── Config ──
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    if let Some(port) = &cli.port {
        config.receiver.mode = "serial".into();
        config.receiver.serial_port = port.clone();
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("Config inválida: {p}");
        }
        std::process::exit(2);
    }

    // ── Thread de I/O ──
    let stop = StopSignal::new();
    if let Err(e) = mould_core::shutdown::watch_signals(stop.clone()) {
        warn!("Ctrl+C não encerrará de forma limpa: {e}");
    }
    let (rx, io_handle) = net_thread::spawn_ingest_thread(config.receiver.clone(), stop.clone());
    let mut gateway = Gateway::new(&config, LogForwarder);

    info!(
        "Receiver ativo – modo {}, formato {:?}, fila {}",
        config.receiver.mode, config.receiver.wire_format, config.receiver.queue_capacity
    );

    // ── Loop de processamento ──
    let mut received = 0u64;
    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(msg) => {
                received += 1;
                gateway.handle(&msg);
                if cli.max_lines.is_some_and(|max| received >= max) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) if stop.is_stopped() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Thread de I/O encerrou");
                break;
            }
        }
    }

    stop.stop();
    let dropped = io_handle.join().unwrap_or_else(|_| {
        error!("Thread de I/O terminou com pânico");
        0
    });
    let (forwarded, rejected) = gateway.counters();
    info!(
        "Receiver encerrado: {received} linhas, {forwarded} encaminhadas, {rejected} rejeitadas, {dropped} descartadas"
    );
}
