//! Fontes de leitura: sensor ao vivo ou replay de dataset.
//!
//! A variante é escolhida por quem constrói o pipeline; o núcleo não sonda o
//! sistema de arquivos para decidir.
//!
//! Regras do dataset (CSV `temperatura,umidade[,...]`):
//! - linha vazia é ignorada;
//! - linha com menos de 2 campos, ou com os 2 primeiros não numéricos, é
//!   pulada (isso cobre o cabeçalho);
//! - colunas extras são ignoradas;
//! - ao fim dos dados o replay volta ao início, sem terminar nunca.

use crate::types::Reading;
use std::io::{BufRead, Seek, SeekFrom};
use tracing::{debug, warn};

/// Erros do colaborador de sensor.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Falha de leitura do sensor: {0}")]
    ReadFailed(String),

    #[error("Sensor devolveu valor inválido: temp={temperature_c} rh={humidity_pct}")]
    InvalidValue {
        temperature_c: f64,
        humidity_pct: f64,
    },

    #[error("Erro de I/O do sensor: {0}")]
    Io(#[from] std::io::Error),
}

/// Erros de uma fonte de leitura.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error("Dataset sem nenhuma linha válida")]
    DatasetEmpty,

    #[error("Erro de I/O no dataset: {0}")]
    Io(#[from] std::io::Error),
}

/// Colaborador de sensor de temperatura/umidade.
pub trait SensorPort: Send {
    fn read(&mut self) -> Result<(f64, f64), SensorError>;
}

/// Tabela embutida usada quando não há sensor nem dataset.
pub const WARM_UP_TABLE: [(f64, f64); 10] = [
    (19.5, 45.0),
    (20.0, 47.5),
    (21.0, 50.0),
    (22.5, 52.5),
    (23.5, 55.0),
    (24.0, 60.0),
    (24.5, 65.0),
    (25.0, 70.0),
    (25.5, 75.0),
    (26.0, 80.0),
];

/// Interpreta uma linha do dataset. `None` para linha vazia ou malformada.
pub fn parse_dataset_row(line: &str) -> Option<(f64, f64)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.split(',').map(str::trim);
    let t = parts.next()?.parse::<f64>().ok()?;
    let rh = parts.next()?.parse::<f64>().ok()?;
    (t.is_finite() && rh.is_finite()).then_some((t, rh))
}

// ──────────────────────────────────────────────
// Replay
// ──────────────────────────────────────────────

/// Leitor com rebobinamento para o replay em streaming.
pub trait ReplayReader: BufRead + Seek + Send {}

impl<T: BufRead + Seek + Send> ReplayReader for T {}

/// Replay sobre uma sequência carregada em memória.
#[derive(Debug, Clone)]
pub struct PreloadedReplay {
    rows: Vec<(f64, f64)>,
    index: usize,
}

impl PreloadedReplay {
    pub fn new(rows: Vec<(f64, f64)>) -> Result<Self, SourceError> {
        if rows.is_empty() {
            return Err(SourceError::DatasetEmpty);
        }
        Ok(Self { rows, index: 0 })
    }

    /// Carrega um CSV inteiro, pulando cabeçalho e linhas malformadas.
    pub fn from_csv(text: &str) -> Result<Self, SourceError> {
        let mut skipped = 0usize;
        let rows: Vec<_> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| {
                let row = parse_dataset_row(l);
                if row.is_none() {
                    skipped += 1;
                }
                row
            })
            .collect();
        if skipped > 0 {
            debug!("Dataset: {skipped} linhas ignoradas");
        }
        Self::new(rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn next_row(&mut self) -> (f64, f64) {
        let row = self.rows[self.index];
        self.index = (self.index + 1) % self.rows.len();
        row
    }
}

/// Replay lendo o dataset linha a linha, rebobinando no fim.
pub struct StreamingReplay {
    reader: Box<dyn ReplayReader>,
    line: String,
}

impl StreamingReplay {
    pub fn new(reader: Box<dyn ReplayReader>) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }

    fn next_row(&mut self) -> Result<(f64, f64), SourceError> {
        // Um passe completo sem linha válida encerra a busca.
        let mut rewound_without_row = false;
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                if rewound_without_row {
                    return Err(SourceError::DatasetEmpty);
                }
                self.reader.seek(SeekFrom::Start(0))?;
                rewound_without_row = true;
                continue;
            }
            match parse_dataset_row(&self.line) {
                Some(row) => return Ok(row),
                None => debug!("Linha do dataset ignorada: {:?}", self.line.trim_end()),
            }
        }
    }
}

impl std::fmt::Debug for StreamingReplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingReplay").finish_non_exhaustive()
    }
}

/// Dataset de replay.
#[derive(Debug)]
pub enum ReplayDataset {
    Preloaded(PreloadedReplay),
    Streaming(StreamingReplay),
}

// ──────────────────────────────────────────────
// Fonte
// ──────────────────────────────────────────────

/// Origem das leituras do pipeline.
pub enum ReadingSource {
    Live(Box<dyn SensorPort>),
    Replay(ReplayDataset),
}

impl ReadingSource {
    pub fn live(sensor: impl SensorPort + 'static) -> Self {
        ReadingSource::Live(Box::new(sensor))
    }

    pub fn preloaded(rows: Vec<(f64, f64)>) -> Result<Self, SourceError> {
        Ok(ReadingSource::Replay(ReplayDataset::Preloaded(
            PreloadedReplay::new(rows)?,
        )))
    }

    pub fn streaming(reader: impl ReplayReader + 'static) -> Self {
        ReadingSource::Replay(ReplayDataset::Streaming(StreamingReplay::new(Box::new(
            reader,
        ))))
    }

    /// Tabela embutida de aquecimento.
    pub fn warm_up() -> Self {
        ReadingSource::Replay(ReplayDataset::Preloaded(PreloadedReplay {
            rows: WARM_UP_TABLE.to_vec(),
            index: 0,
        }))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReadingSource::Live(_) => "live",
            ReadingSource::Replay(ReplayDataset::Preloaded(_)) => "replay",
            ReadingSource::Replay(ReplayDataset::Streaming(_)) => "replay-stream",
        }
    }

    /// Próxima leitura. Leituras do sensor passam sem limitação de faixa,
    /// mas valores não finitos contam como falha completa.
    pub fn next_reading(&mut self) -> Result<Reading, SourceError> {
        let (t, rh) = match self {
            ReadingSource::Live(sensor) => {
                let (t, rh) = sensor.read()?;
                if !(t.is_finite() && rh.is_finite()) {
                    return Err(SensorError::InvalidValue {
                        temperature_c: t,
                        humidity_pct: rh,
                    }
                    .into());
                }
                (t, rh)
            }
            ReadingSource::Replay(ReplayDataset::Preloaded(rows)) => rows.next_row(),
            ReadingSource::Replay(ReplayDataset::Streaming(stream)) => {
                stream.next_row().inspect_err(|e| warn!("Replay falhou: {e}"))?
            }
        };
        Ok(Reading::new(t, rh))
    }
}

impl std::fmt::Debug for ReadingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadingSource").field(&self.kind()).finish()
    }
}
