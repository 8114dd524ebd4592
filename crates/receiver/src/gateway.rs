//! Processamento do gateway: decodifica cada linha e entrega ao forwarder.

use crate::net_thread::LineMessage;
use mould_core::config::{AppConfig, BandThresholds};
use mould_core::forward::{ForwardRecord, Forwarder};
use mould_core::protocol::{WireFormat, decode_line};
use tracing::{debug, info, warn};

/// Forwarder padrão: registra o corpo JSON no log.
#[derive(Debug, Default)]
pub struct LogForwarder;

impl Forwarder for LogForwarder {
    type Error = serde_json::Error;

    fn forward(&mut self, record: &ForwardRecord) -> Result<(), Self::Error> {
        let body = record.to_json()?;
        info!(
            "⇢ {} | {} | {}",
            record.iso_time(),
            record.risk.map_or_else(|| "-".to_string(), |r| r.to_string()),
            body
        );
        Ok(())
    }
}

pub struct Gateway<F> {
    format: WireFormat,
    device_id: String,
    bands: BandThresholds,
    forwarder: F,
    forwarded: u64,
    rejected: u64,
}

impl<F: Forwarder> Gateway<F> {
    pub fn new(config: &AppConfig, forwarder: F) -> Self {
        Self {
            format: config.receiver.wire_format,
            device_id: config.receiver.device_id.clone(),
            bands: config.gateway,
            forwarder,
            forwarded: 0,
            rejected: 0,
        }
    }

    /// Linha malformada é descartada; a próxima segue normalmente.
    pub fn handle(&mut self, msg: &LineMessage) {
        let record = match decode_line(self.format, &msg.line) {
            Ok(r) => r,
            Err(e) => {
                self.rejected += 1;
                debug!("Linha rejeitada ({e}): {:?}", msg.line);
                return;
            }
        };

        let fwd = ForwardRecord::new(
            record,
            msg.received_at,
            Some(self.device_id.as_str()),
            &self.bands,
        );
        match self.forwarder.forward(&fwd) {
            Ok(()) => self.forwarded += 1,
            Err(e) => warn!("Falha ao encaminhar registro: {e}"),
        }
    }

    /// (encaminhadas, rejeitadas)
    pub fn counters(&self) -> (u64, u64) {
        (self.forwarded, self.rejected)
    }
}
