//! Portal lifecycle: sequences storage mount, configuration load, network
//! bring-up, route registration and shutdown.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ConfigStore;
use crate::error::{PortalError, Result};
use crate::http::Router;
use crate::routes::{self, PortalContext, SharedContext};
use crate::scan::{WifiScan, WifiScanner};
use crate::session::SessionManager;

/// Hold time on the reset button that qualifies as factory-reset intent at
/// startup.
pub const RESET_HOLD: Duration = Duration::from_secs(3);

/// AP/DNS bring-up retry policy: bounded retry, then fatal restart, the
/// same escalation as a failed storage mount.
const BRINGUP_ATTEMPTS: u32 = 3;
const BRINGUP_BACKOFF: Duration = Duration::from_millis(250);

/// Delay before a fatal restart so the log line makes it out.
const FATAL_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Action queued by a route handler, executed on the next lifecycle tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Reboot,
    FactoryReset,
}

/// Platform firmware-update sink; the `/update` route streams into it.
pub trait FirmwareUpdater: Send {
    fn begin(&mut self) -> Result<()>;
    fn write(&mut self, chunk: &[u8]) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// SoftAP and captive DNS, owned for the Starting→Stopping window.
pub trait NetworkServices: Send {
    fn start_access_point(
        &mut self,
        ssid: &str,
        password: &str,
        ip: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<()>;
    fn start_dns_redirect(&mut self, ip: Ipv4Addr) -> Result<()>;
    /// One non-blocking service step for the polled collaborators.
    fn poll(&mut self);
    fn stop(&mut self);
}

/// Everything else the portal asks of the device: GPIO roles, the reset
/// signal, timezone, delays and restarts.
pub trait PortalPlatform: Send {
    fn apply_timezone(&mut self, tz: &str);
    /// Assigns the status LED, reset button and optional RGB indicator
    /// roles from the config record.
    fn configure_pins(&mut self, led_pin: u8, reset_pin: u8, rgb: Option<u8>) -> Result<()>;
    /// True if the reset button is held for the full duration (sampled at
    /// startup, before the network comes up).
    fn reset_button_held(&mut self, hold: Duration) -> bool;
    /// Instantaneous runtime sample of the reset signal.
    fn reset_asserted(&mut self) -> bool;
    fn delay(&mut self, d: Duration);
    /// Hard restart of the whole process. Implementations for real
    /// hardware do not return.
    fn restart(&mut self);
}

/// Start-time options; everything not overridden comes from the config
/// record. One struct consumed by a single constructor-and-start path
/// instead of a family of overloaded entry points.
#[derive(Debug, Clone, Default)]
pub struct PortalSettings {
    /// SSID override; default is the effective device name.
    pub ssid: Option<String>,
    /// Hostname override applied to the record before bring-up.
    pub hostname: Option<String>,
}

/// Top-level orchestrator. Owns the config store and session table (via
/// the shared context) and the network/platform collaborators.
pub struct PortalLifecycle {
    state: PortalState,
    settings: PortalSettings,
    ctx: SharedContext,
    router: Option<Arc<Router>>,
    net: Box<dyn NetworkServices>,
    platform: Box<dyn PortalPlatform>,
}

impl PortalLifecycle {
    pub fn new(
        config: ConfigStore,
        scanner: Box<dyn WifiScanner>,
        updater: Option<Box<dyn FirmwareUpdater>>,
        net: Box<dyn NetworkServices>,
        platform: Box<dyn PortalPlatform>,
        settings: PortalSettings,
    ) -> Self {
        let ctx = Arc::new(Mutex::new(PortalContext {
            config,
            sessions: SessionManager::default(),
            scan: WifiScan::new(scanner),
            updater,
            pending: None,
        }));
        Self {
            state: PortalState::Stopped,
            settings,
            ctx,
            router: None,
            net,
            platform,
        }
    }

    pub fn state(&self) -> PortalState {
        self.state
    }

    /// Shared context handle for the platform HTTP adapter.
    pub fn context(&self) -> SharedContext {
        self.ctx.clone()
    }

    /// Route table, present once the portal has been started.
    pub fn router(&self) -> Option<Arc<Router>> {
        self.router.clone()
    }

    /// Brings the portal up. No-op when already Running. A storage mount
    /// failure, an unhealable config document or a network bring-up
    /// failure after the bounded retries all escalate to a platform
    /// restart.
    pub fn start(&mut self) -> Result<()> {
        if self.state == PortalState::Running {
            log::info!("Portal already running");
            return Ok(());
        }
        self.state = PortalState::Starting;
        log::info!("Portal starting...");

        let (ssid, password, ip, mask) = {
            let mut ctx = self.ctx.lock().unwrap();

            if let Err(e) = ctx.config.mount() {
                drop(ctx);
                return Err(self.fatal(e));
            }

            match ctx.config.load() {
                Ok(()) => {}
                Err(PortalError::StorageMount(m)) => {
                    drop(ctx);
                    return Err(self.fatal(PortalError::StorageMount(m)));
                }
                Err(e) => {
                    // Missing or corrupt document: self-heal by persisting
                    // defaults with the default password.
                    log::warn!("Config load failed ({e}), writing defaults");
                    if let Err(e) = ctx.config.save(true) {
                        drop(ctx);
                        return Err(self.fatal(e));
                    }
                }
            }

            if let Some(hostname) = &self.settings.hostname {
                ctx.config.record_mut().hostname = hostname.clone();
            }

            let record = ctx.config.record().clone();
            self.platform.apply_timezone(&record.timezone);
            let rgb = record.has_rgb_led.then_some(record.rgb_brightness);
            if let Err(e) = self
                .platform
                .configure_pins(record.led_pin, record.reset_pin, rgb)
            {
                drop(ctx);
                return Err(self.fatal(e));
            }

            if self.platform.reset_button_held(RESET_HOLD) {
                log::warn!("Reset button held at startup");
                let healed = match ctx.config.reset_to_factory_default() {
                    Ok(()) => ctx.config.save(true),
                    Err(e) => Err(e),
                };
                if let Err(e) = healed {
                    drop(ctx);
                    return Err(self.fatal(e));
                }
            }

            let record = ctx.config.record();
            let ssid = self
                .settings
                .ssid
                .clone()
                .unwrap_or_else(|| record.effective_device_name().to_string());
            // The admin credential doubles as the WiFi join secret;
            // intentional minimalism for a single-admin device.
            (ssid, record.admin_password.clone(), record.ip, record.ip_mask)
        };

        if let Err(e) = self.bring_up_network(&ssid, &password, ip, mask) {
            return Err(self.fatal(e));
        }

        if self.router.is_none() {
            self.router = Some(Arc::new(routes::build_router(self.ctx.clone(), ip)));
            log::info!("Routes registered");
        }

        self.state = PortalState::Running;
        log::info!("Portal running, SSID '{ssid}' at {ip}");
        Ok(())
    }

    /// One service-loop tick: polls the network collaborators and the scan
    /// machine, drains pending handler actions, and watches the reset
    /// signal. A runtime reset assertion forces a full device restart so
    /// the next boot re-enters Starting cleanly.
    pub fn handle(&mut self) {
        if self.state != PortalState::Running {
            return;
        }

        self.net.poll();

        let pending = {
            let mut ctx = self.ctx.lock().unwrap();
            ctx.scan.poll();
            ctx.pending.take()
        };

        match pending {
            Some(PendingAction::Reboot) => {
                log::warn!("Reboot requested");
                self.platform.restart();
                return;
            }
            Some(PendingAction::FactoryReset) => {
                let mut ctx = self.ctx.lock().unwrap();
                if let Err(e) = ctx.config.reset_to_factory_default() {
                    log::error!("Factory reset failed: {e}");
                }
                drop(ctx);
                self.platform.restart();
                return;
            }
            None => {}
        }

        if self.platform.reset_asserted() {
            log::warn!("Reset button pressed during runtime");
            self.platform.restart();
        }
    }

    /// Tears down DNS and the AP. Configuration and the registered routes
    /// remain intact. Idempotent.
    pub fn stop(&mut self) {
        if self.state == PortalState::Stopped {
            return;
        }
        self.state = PortalState::Stopping;
        self.net.stop();
        self.state = PortalState::Stopped;
        log::info!("Portal stopped");
    }

    fn bring_up_network(
        &mut self,
        ssid: &str,
        password: &str,
        ip: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<()> {
        let mut last = None;
        for attempt in 1..=BRINGUP_ATTEMPTS {
            let result = match self.net.start_access_point(ssid, password, ip, mask) {
                Ok(()) => self.net.start_dns_redirect(ip),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("Network bring-up attempt {attempt}/{BRINGUP_ATTEMPTS} failed: {e}");
                    self.net.stop();
                    last = Some(e);
                    if attempt < BRINGUP_ATTEMPTS {
                        self.platform.delay(BRINGUP_BACKOFF);
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| PortalError::NetworkBringup("unknown".to_string())))
    }

    /// Fatal condition: log, give the message time to flush, restart.
    /// Returns the error for callers (and tests) where the platform
    /// restart does return.
    fn fatal(&mut self, err: PortalError) -> PortalError {
        log::error!("Fatal: {err}; restarting device");
        self.state = PortalState::Stopped;
        self.platform.delay(FATAL_DELAY);
        self.platform.restart();
        err
    }
}
