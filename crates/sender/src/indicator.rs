//! LED de risco via `/sys/class/leds/<nome>/brightness`.

use mould_core::risk::Indicator;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct LedIndicator {
    path: Option<PathBuf>,
    last: Option<bool>,
}

impl LedIndicator {
    /// Caminho vazio = só log.
    pub fn new(path: &str) -> Self {
        Self {
            path: (!path.is_empty()).then(|| PathBuf::from(path)),
            last: None,
        }
    }
}

impl Indicator for LedIndicator {
    fn set(&mut self, on: bool) {
        if self.last == Some(on) {
            return;
        }
        self.last = Some(on);
        match &self.path {
            Some(path) => {
                if let Err(e) = std::fs::write(path, if on { "1" } else { "0" }) {
                    warn!("LED {}: {e}", path.display());
                }
            }
            None => debug!("LED {}", if on { "ON" } else { "OFF" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_brightness_on_change() {
        let path = std::env::temp_dir().join(format!("mould_led_{}", std::process::id()));
        let mut led = LedIndicator::new(path.to_str().unwrap());
        led.set(true);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");
        led.set(false);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn log_only_without_path() {
        let mut led = LedIndicator::new("");
        led.set(true);
        led.set(true);
        assert_eq!(led.last, Some(true));
    }
}
