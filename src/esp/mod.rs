//! ESP-IDF implementations of the portal's platform seams: SoftAP +
//! captive DNS, the HTTP server adapter, GPIO/restart platform and the
//! OTA firmware sink.

mod net;
mod ota;
mod platform;
mod server;

pub use net::{EspNetworkServices, EspWifiScanner};
pub use ota::EspFirmwareUpdater;
pub use platform::EspPlatform;
pub use server::serve;
