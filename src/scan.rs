//! Poll-based WiFi network scan.
//!
//! The radio scan is asynchronous on every supported platform, so it is
//! modeled as a state machine the service loop polls: a caller issues
//! `start`, then polls for completion. Nothing here ever blocks.

use serde::Serialize;

use crate::error::Result;

/// One observed network, serialized into the `/wifiscan` JSON response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScanNetwork {
    pub ssid: String,
    pub rssi: i32,
    pub secure: bool,
}

/// Platform radio scan service.
pub trait WifiScanner: Send {
    fn start_scan(&mut self) -> Result<()>;
    /// `Ok(None)` while the scan is still in flight.
    fn poll_scan(&mut self) -> Result<Option<Vec<ScanNetwork>>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Started,
    Running,
    Ready(Vec<ScanNetwork>),
    Failed(String),
}

/// Scan poller owned by the portal context. There is no cancellation; a
/// finished or failed scan simply returns to `Idle` once consumed.
pub struct WifiScan {
    scanner: Box<dyn WifiScanner>,
    state: ScanState,
}

impl WifiScan {
    pub fn new(scanner: Box<dyn WifiScanner>) -> Self {
        Self {
            scanner,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Kicks off a scan only when the machine is idle. In-flight scans
    /// and unconsumed results are left alone; a finished scan must be
    /// reported through [`WifiScan::status_json`] before the next one can
    /// start.
    pub fn start(&mut self) {
        if self.state != ScanState::Idle {
            return;
        }
        match self.scanner.start_scan() {
            Ok(()) => self.state = ScanState::Started,
            Err(e) => {
                log::warn!("WiFi scan start failed: {e}");
                self.state = ScanState::Failed(e.to_string());
            }
        }
    }

    /// Advances the state machine one step; call from the service loop or
    /// on demand from the route handler.
    pub fn poll(&mut self) {
        match self.state {
            ScanState::Started | ScanState::Running => match self.scanner.poll_scan() {
                Ok(None) => self.state = ScanState::Running,
                Ok(Some(networks)) => {
                    log::info!("WiFi scan finished, {} network(s)", networks.len());
                    self.state = ScanState::Ready(networks);
                }
                Err(e) => {
                    log::warn!("WiFi scan failed: {e}");
                    self.state = ScanState::Failed(e.to_string());
                }
            },
            _ => {}
        }
    }

    /// JSON for the `/wifiscan` route. Ready results and failures are
    /// one-shot: reporting them returns the machine to `Idle`.
    pub fn status_json(&mut self) -> String {
        let (state, body) = match &self.state {
            ScanState::Idle => ("idle", None),
            ScanState::Started => ("started", None),
            ScanState::Running => ("running", None),
            ScanState::Ready(networks) => (
                "ready",
                Some(serde_json::to_string(networks).unwrap_or_else(|_| "[]".to_string())),
            ),
            ScanState::Failed(_) => ("failed", None),
        };
        let json = match body {
            Some(networks) => format!(r#"{{"status":"{state}","networks":{networks}}}"#),
            None => format!(r#"{{"status":"{state}"}}"#),
        };
        if matches!(self.state, ScanState::Ready(_) | ScanState::Failed(_)) {
            self.state = ScanState::Idle;
        }
        json
    }
}
