//! # Mould Sender
//!
//! Endpoint sensor: amostra temperatura/umidade, calcula ponto de orvalho,
//! suaviza, mantém o nível de risco de mofo e transmite uma linha CSV por
//! amostra ao central conectado.
//!
//! ## Uso
//! ```bash
//! mould_sender                              # config.toml ao lado do executável
//! mould_sender --dataset dados.csv          # replay de dataset
//! mould_sender --listen 127.0.0.1:5006 --max-samples 60
//! ```

mod iio_sensor;
mod indicator;
mod link;

use clap::Parser;
use iio_sensor::IioSensor;
use indicator::LedIndicator;
use link::TcpPeripheral;
use mould_core::config::AppConfig;
use mould_core::protocol::{WireFormat, encode_line, encode_risk_line};
use mould_core::source::{ReadingSource, SourceError};
use mould_core::transport::{PeripheralSession, StopSignal};
use mould_core::{RiskPipeline, RiskSample, TickOutcome};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Maior espera entre voltas do loop.
const MAX_IDLE: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "mould_sender", about = "Endpoint sensor de risco de mofo")]
struct Cli {
    /// Caminho do config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV de replay (sobrepõe sender.dataset_path)
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Endereço de escuta (sobrepõe sender.listen_addr)
    #[arg(short, long)]
    listen: Option<String>,

    /// Encerra após N amostras
    #[arg(long)]
    max_samples: Option<u64>,
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

    // ── Carregar config ──
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    if let Some(dataset) = &cli.dataset {
        config.sender.dataset_path = dataset.display().to_string();
    }
    if let Some(listen) = &cli.listen {
        config.sender.listen_addr = listen.clone();
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("Config inválida: {p}");
        }
        std::process::exit(2);
    }

    let sender_cfg = &config.sender;

    // ── Fonte de leituras ──
    let source = match open_source(sender_cfg) {
        Ok(s) => s,
        Err(e) => {
            error!("Não foi possível abrir a fonte de leituras: {e}");
            std::process::exit(1);
        }
    };
    info!("Fonte de leituras: {}", source.kind());

    // ── Pipeline + link ──
    let clock = Instant::now();
    let mut pipeline = RiskPipeline::from_config(source, sender_cfg, config.risk, 0.0)
        .with_indicator(LedIndicator::new(&sender_cfg.indicator_path));
    let mut session = PeripheralSession::new(TcpPeripheral::new(
        sender_cfg.listen_addr.as_str(),
        sender_cfg.device_name.as_str(),
    ));
    let stop = StopSignal::new();
    if let Err(e) = mould_core::shutdown::watch_signals(stop.clone()) {
        warn!("Ctrl+C não encerrará de forma limpa: {e}");
    }

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   💧 MOULD SENDER – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Dispositivo: {}", sender_cfg.device_name);
    println!("  Escuta:      {}", sender_cfg.listen_addr);
    println!("  Amostragem:  {:.2} Hz", sender_cfg.sample_rate_hz);
    println!("  Formato:     {:?}", sender_cfg.wire_format);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let mut sent = 0u64;
    while !stop.is_stopped() {
        session.poll();

        let now = clock.elapsed().as_secs_f64();
        match pipeline.tick(now) {
            TickOutcome::Idle => {}
            TickOutcome::SampleFailed(SourceError::DatasetEmpty) => {
                error!("Dataset sem linhas válidas, encerrando");
                break;
            }
            TickOutcome::SampleFailed(_) => {}
            TickOutcome::Sampled(sample) => {
                let elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
                let encoded =
                    format_line(sender_cfg.wire_format, &sample, elapsed_ms, &sender_cfg.device_name);
                match encoded {
                    Ok(line) => match session.send_line(&line) {
                        Ok(true) => {
                            sent += 1;
                            info!("→ {} | {}", line.trim_end(), sample.risk);
                        }
                        Ok(false) => debug!("Sem central, linha descartada: {}", line.trim_end()),
                        Err(e) => warn!("Erro ao enviar linha: {e}"),
                    },
                    Err(e) => error!("Erro ao codificar amostra: {e}"),
                }

                if let Some(max) = cli.max_samples {
                    if pipeline.counters().0 >= max {
                        info!("{max} amostras concluídas ({sent} enviadas)");
                        stop.stop();
                    }
                }
            }
        }

        let wait = Duration::from_secs_f64(pipeline.scheduler().time_until_due());
        stop.sleep(wait.min(MAX_IDLE));
    }

    session.shutdown();
    let (samples, failures) = pipeline.counters();
    info!("Sender encerrado: {samples} amostras, {failures} falhas, {sent} enviadas");
}

/// Escolhe a fonte: dataset, sensor IIO ou tabela embutida.
fn open_source(cfg: &mould_core::SenderConfig) -> Result<ReadingSource, SourceError> {
    if !cfg.dataset_path.is_empty() {
        let path = Path::new(&cfg.dataset_path);
        if cfg.dataset_streaming {
            let file = File::open(path)?;
            return Ok(ReadingSource::streaming(BufReader::new(file)));
        }
        let text = std::fs::read_to_string(path)?;
        let replay = mould_core::source::PreloadedReplay::from_csv(&text)?;
        info!("Dataset {} carregado: {} linhas", path.display(), replay.len());
        return Ok(ReadingSource::Replay(
            mould_core::source::ReplayDataset::Preloaded(replay),
        ));
    }
    if !cfg.sensor_path.is_empty() {
        return Ok(ReadingSource::live(IioSensor::new(&cfg.sensor_path)));
    }
    info!("Sem dataset nem sensor, usando tabela de aquecimento");
    Ok(ReadingSource::warm_up())
}

/// Codifica a amostra no formato configurado.
fn format_line(
    format: WireFormat,
    sample: &RiskSample,
    elapsed_ms: u64,
    device_name: &str,
) -> Result<String, mould_core::protocol::ProtocolError> {
    match format {
        WireFormat::Risk => Ok(encode_risk_line(&sample.smoothed, sample.risk)),
        other => encode_line(other, &sample.record(elapsed_ms, device_name)),
    }
}
