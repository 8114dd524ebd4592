//! Thread de I/O que ingere linhas (central ou serial) e as entrega ao
//! processamento via channel.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use mould_core::config::{PeerConfig, ReceiverConfig};
use mould_core::transport::{
    Advertisement, CentralLink, CentralSession, Connection, LineFramer, LinkError, PortOpener,
    SerialIngest, StopSignal,
};
use serialport::{ClearBuffer, SerialPort};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_millis(200);
const SERIAL_TIMEOUT: Duration = Duration::from_millis(200);

/// Linha recebida da thread de I/O.
#[derive(Debug, Clone)]
pub struct LineMessage {
    pub line: String,
    /// Momento da captura (UTC)
    pub received_at: DateTime<Utc>,
}

// ──────────────────────────────────────────────
// Fila com descarte do mais antigo
// ──────────────────────────────────────────────

/// Produtor de uma fila limitada que, cheia, descarta o item mais antigo.
pub struct DropOldestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> DropOldestQueue<T> {
    /// Cria a fila e devolve o lado consumidor.
    pub fn new(capacity: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = bounded(capacity.max(1));
        let queue = Self {
            tx,
            rx: rx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (queue, rx)
    }

    /// Nunca bloqueia.
    pub fn push(&self, mut item: T) {
        loop {
            match self.tx.try_send(item) {
                // Desconexão é impossível: a própria fila guarda um receiver
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // Se o consumidor esvaziou no meio tempo, só tenta de novo
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ──────────────────────────────────────────────
// Central sobre TCP
// ──────────────────────────────────────────────

/// Central do host: o "scan" devolve a tabela estática de pares.
pub struct TcpCentral {
    peers: Vec<PeerConfig>,
}

impl TcpCentral {
    pub fn new(peers: Vec<PeerConfig>) -> Self {
        Self { peers }
    }
}

impl CentralLink for TcpCentral {
    type Conn = TcpConnection;

    fn scan(&mut self) -> Result<Vec<Advertisement>, LinkError> {
        Ok(self
            .peers
            .iter()
            .map(|p| Advertisement {
                name: (!p.name.is_empty()).then(|| p.name.clone()),
                address: p.address.clone(),
                services: p.services.clone(),
            })
            .collect())
    }

    fn connect(&mut self, adv: &Advertisement) -> Result<TcpConnection, LinkError> {
        let failed = |reason: String| LinkError::ConnectFailed {
            peer: adv.address.clone(),
            reason,
        };
        let addr = adv
            .address
            .to_socket_addrs()
            .map_err(|e| failed(e.to_string()))?
            .next()
            .ok_or_else(|| failed("endereço não resolvido".into()))?;
        let stream =
            TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| failed(e.to_string()))?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(TcpConnection::new(stream))
    }
}

pub struct TcpConnection {
    stream: TcpStream,
    framer: LineFramer,
    ready: VecDeque<String>,
    connected: bool,
    buf: [u8; 256],
}

impl TcpConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            framer: LineFramer::new(),
            ready: VecDeque::new(),
            connected: true,
            buf: [0u8; 256],
        }
    }
}

impl Connection for TcpConnection {
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        if let Some(line) = self.ready.pop_front() {
            return Ok(Some(line.into_bytes()));
        }
        match self.stream.read(&mut self.buf) {
            Ok(0) => {
                self.connected = false;
                Err(LinkError::NotConnected)
            }
            Ok(n) => {
                self.ready.extend(self.framer.push(&self.buf[..n]));
                Ok(self.ready.pop_front().map(String::into_bytes))
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => {
                self.connected = false;
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

// ──────────────────────────────────────────────
// Porta serial
// ──────────────────────────────────────────────

/// Abre a porta serial com timeout curto de leitura, para que o loop de
/// ingestão volte a checar a parada mesmo sem dados.
pub struct SerialPortOpener {
    /// Vazio = detectar a cada abertura
    configured: String,
    baud: u32,
    current: String,
}

impl SerialPortOpener {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        let configured = port.into();
        Self {
            current: configured.clone(),
            configured,
            baud,
        }
    }
}

impl PortOpener for SerialPortOpener {
    type Port = Box<dyn SerialPort>;

    fn open(&mut self) -> std::io::Result<Self::Port> {
        let name = if self.configured.is_empty() {
            find_port().ok_or_else(|| {
                std::io::Error::new(ErrorKind::NotFound, "nenhuma porta serial encontrada")
            })?
        } else {
            self.configured.clone()
        };
        self.current = name;

        let port = serialport::new(&self.current, self.baud)
            .timeout(SERIAL_TIMEOUT)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        // Descarta linha parcial pendente
        if let Err(e) = port.clear(ClearBuffer::Input) {
            debug!("Não foi possível limpar a entrada de {}: {e}", self.current);
        }
        Ok(port)
    }

    fn describe(&self) -> String {
        if self.current.is_empty() {
            format!("<auto> @ {}", self.baud)
        } else {
            format!("{} @ {}", self.current, self.baud)
        }
    }
}

/// Primeira porta ACM/usbmodem; senão a primeira listada.
fn pick_port(names: &[String]) -> Option<String> {
    names
        .iter()
        .find(|n| n.contains("ACM") || n.contains("usbmodem"))
        .or_else(|| names.first())
        .cloned()
}

fn find_port() -> Option<String> {
    let ports = serialport::available_ports().ok()?;
    let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    pick_port(&names)
}

// ──────────────────────────────────────────────
// Thread
// ──────────────────────────────────────────────

/// Inicia a thread de I/O. Retorna o receiver do channel e o handle.
pub fn spawn_ingest_thread(
    config: ReceiverConfig,
    stop: StopSignal,
) -> (Receiver<LineMessage>, JoinHandle<u64>) {
    let (queue, rx) = DropOldestQueue::new(config.queue_capacity);

    let handle = std::thread::Builder::new()
        .name("mould-ingest".into())
        .spawn(move || {
            ingest_loop(&queue, &config, &stop);
            queue.dropped()
        })
        .expect("Falha ao criar thread de I/O");

    (rx, handle)
}

fn ingest_loop(queue: &DropOldestQueue<LineMessage>, config: &ReceiverConfig, stop: &StopSignal) {
    let source: Box<dyn FnMut() -> Vec<String>> = if config.mode == "central" {
        info!(
            "Modo central: {} par(es), serviço {}",
            config.peers.len(),
            config.service
        );
        let mut session = CentralSession::new(
            TcpCentral::new(config.peers.clone()),
            config.service.as_str(),
            Duration::from_secs_f64(config.scan_backoff_secs),
            stop.clone(),
        );
        Box::new(move || session.poll().into_iter().collect())
    } else {
        let mut ingest = SerialIngest::new(
            SerialPortOpener::new(config.serial_port.as_str(), config.baud),
            Duration::from_secs_f64(config.reconnect_backoff_secs),
            stop.clone(),
        );
        info!("Modo serial: {}", ingest.describe());
        Box::new(move || ingest.poll())
    };

    pump(queue, stop, source);
    info!("Ingestão encerrada");
}

/// Move linhas da fonte para a fila até a parada. A fonte deve retornar em
/// tempo limitado mesmo sem dados.
fn pump(
    queue: &DropOldestQueue<LineMessage>,
    stop: &StopSignal,
    mut source: impl FnMut() -> Vec<String>,
) {
    while !stop.is_stopped() {
        for line in source() {
            let msg = LineMessage {
                line,
                received_at: Utc::now(),
            };
            queue.push(msg);
        }
        if queue.dropped() > 0 {
            debug!("Fila cheia: {} linhas antigas descartadas até agora", queue.dropped());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Instant;

    #[test]
    fn full_queue_drops_oldest() {
        let (q, rx) = DropOldestQueue::new(3);
        for n in 1..=5 {
            q.push(n);
        }
        assert_eq!(q.dropped(), 2);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn consumer_keeps_up_without_drops() {
        let (q, rx) = DropOldestQueue::new(2);
        for n in 0..10 {
            q.push(n);
            assert_eq!(rx.try_recv(), Ok(n));
        }
        assert_eq!(q.dropped(), 0);
    }

    #[test]
    fn scan_lists_configured_peers() {
        let mut central = TcpCentral::new(vec![
            PeerConfig {
                name: "attic".into(),
                address: "127.0.0.1:1".into(),
                services: vec!["nordic-uart".into()],
            },
            PeerConfig {
                name: String::new(),
                address: "127.0.0.1:2".into(),
                services: vec![],
            },
        ]);
        let ads = central.scan().unwrap();
        assert_eq!(ads.len(), 2);
        assert!(ads[0].offers("nordic-uart"));
        assert_eq!(ads[1].name, None);
        assert!(!ads[1].offers("nordic-uart"));
    }

    #[test]
    fn tcp_connection_frames_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut central = TcpCentral::new(Vec::new());
        let adv = Advertisement {
            name: None,
            address: addr,
            services: vec![],
        };
        let mut conn = central.connect(&adv).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(b"20.000,50.000,9.261,10.739,0\n21.0,5").unwrap();
        peer.flush().unwrap();

        let mut got = None;
        for _ in 0..50 {
            if let Some(line) = conn.read_line().unwrap() {
                got = Some(line);
                break;
            }
        }
        assert_eq!(got, Some(b"20.000,50.000,9.261,10.739,0".to_vec()));

        drop(peer);
        let mut closed = false;
        for _ in 0..50 {
            if conn.read_line().is_err() {
                closed = true;
                break;
            }
        }
        assert!(closed);
        assert!(!conn.is_connected());
    }

    #[test]
    fn connect_to_nothing_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let mut central = TcpCentral::new(Vec::new());
        let adv = Advertisement {
            name: None,
            address: addr,
            services: vec![],
        };
        assert!(matches!(
            central.connect(&adv),
            Err(LinkError::ConnectFailed { .. })
        ));
    }

    #[test]
    fn port_choice_prefers_usb_cdc() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            pick_port(&names(&["/dev/ttyS0", "/dev/ttyACM1"])).as_deref(),
            Some("/dev/ttyACM1")
        );
        assert_eq!(
            pick_port(&names(&["/dev/cu.Bluetooth", "/dev/cu.usbmodem1101"])).as_deref(),
            Some("/dev/cu.usbmodem1101")
        );
        assert_eq!(pick_port(&names(&["/dev/ttyS0"])).as_deref(), Some("/dev/ttyS0"));
        assert_eq!(pick_port(&[]), None);
    }

    #[test]
    fn missing_serial_device_fails_to_open() {
        let mut opener = SerialPortOpener::new("/dev/mould-nonexistent", 115_200);
        assert!(opener.open().is_err());
        assert_eq!(opener.describe(), "/dev/mould-nonexistent @ 115200");
    }

    /// Porta sem tráfego: cada leitura expira como o timeout do driver.
    struct SilentPort;

    impl Read for SilentPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(20));
            Err(std::io::Error::new(ErrorKind::TimedOut, "sem dados"))
        }
    }

    struct SilentOpener;

    impl PortOpener for SilentOpener {
        type Port = SilentPort;

        fn open(&mut self) -> std::io::Result<SilentPort> {
            Ok(SilentPort)
        }

        fn describe(&self) -> String {
            "silent".into()
        }
    }

    #[test]
    fn silent_serial_port_honours_stop() {
        let stop = StopSignal::new();
        let (queue, rx) = DropOldestQueue::new(4);
        let worker_stop = stop.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let mut ingest = SerialIngest::new(SilentOpener, Duration::ZERO, worker_stop.clone());
            pump(&queue, &worker_stop, move || ingest.poll());
            let _ = done_tx.send(());
        });

        std::thread::sleep(Duration::from_millis(100));
        let start = Instant::now();
        stop.stop();
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(rx.try_recv().is_err());
    }
}
