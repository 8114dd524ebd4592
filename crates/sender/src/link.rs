//! Link periférico sobre TCP – substituto do rádio no host.
//!
//! "Anunciar" é escutar no endereço configurado; o primeiro central que
//! conecta recebe as linhas. Um central por vez, como no UART BLE.

use mould_core::transport::{LinkError, PeripheralLink};
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct TcpPeripheral {
    addr: String,
    name: String,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl TcpPeripheral {
    pub fn new(addr: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: name.into(),
            listener: None,
            stream: None,
        }
    }

    /// Endereço efetivo (útil com porta 0).
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn accept(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!("Não foi possível configurar {peer}: {e}");
                    return;
                }
                let _ = stream.set_nodelay(true);
                info!("Central {peer} conectado a {}", self.name);
                self.stream = Some(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => debug!("accept falhou: {e}"),
        }
    }

    /// Detecta fechamento do par sem bloquear.
    fn peer_alive(stream: &TcpStream) -> bool {
        let mut buf = [0u8; 1];
        match stream.peek(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == ErrorKind::WouldBlock,
        }
    }
}

impl PeripheralLink for TcpPeripheral {
    fn start_advertising(&mut self) -> Result<(), LinkError> {
        if self.listener.is_none() {
            let listener = TcpListener::bind(&self.addr)?;
            listener.set_nonblocking(true)?;
            self.listener = Some(listener);
        }
        info!("Anunciando \"{}\" em {}", self.name, self.addr);
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if let Some(stream) = self.stream.as_ref() {
            if Self::peer_alive(stream) {
                return true;
            }
            self.stream = None;
            return false;
        }
        self.accept();
        self.stream.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        stream.write_all(bytes)?;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
