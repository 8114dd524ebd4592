//! Encerramento por sinal: SIGINT/SIGTERM (ou Ctrl+C) acionam o
//! [`StopSignal`], e os loops terminam entre ticks.

use crate::transport::StopSignal;
use std::future::Future;
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Observa os sinais de encerramento numa thread dedicada.
pub fn watch_signals(stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
    stop_on(stop, shutdown_signal())
}

/// Aciona `stop` quando `trigger` conclui com sucesso. Falha na instalação
/// do handler só é registrada; o processo segue sem encerramento gracioso.
pub fn stop_on<F>(stop: StopSignal, trigger: F) -> std::io::Result<JoinHandle<()>>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("mould-signal".into())
        .spawn(move || match runtime.block_on(trigger) {
            Ok(()) => {
                info!("Sinal de encerramento recebido");
                stop.stop();
            }
            Err(e) => warn!("Handler de sinal indisponível: {e}"),
        })
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
