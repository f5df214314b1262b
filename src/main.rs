#[cfg(target_os = "espidf")]
fn main() {
    use std::time::Duration;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    if let Err(e) = run() {
        log::error!("Fatal error: {e:?}");
        log::error!("Restarting in 10 seconds...");
        std::thread::sleep(Duration::from_secs(10));
        unsafe { esp_idf_svc::sys::esp_restart() }
    }
}

#[cfg(target_os = "espidf")]
fn run() -> anyhow::Result<()> {
    use std::time::Duration;

    use captive_portal::config::ConfigStore;
    use captive_portal::esp::{EspFirmwareUpdater, EspNetworkServices, EspPlatform};
    use captive_portal::portal::{PortalLifecycle, PortalSettings};
    use captive_portal::storage::DirStorage;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::gpio::IOPin;
    use esp_idf_svc::hal::prelude::Peripherals;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // The data partition is registered with the VFS by the partition
    // table; plain std::fs works against the mount point from here on.
    let config = ConfigStore::new(Box::new(DirStorage::new("/littlefs")));

    let pins = vec![
        peripherals.pins.gpio2.downgrade(),
        peripherals.pins.gpio4.downgrade(),
    ];
    let platform = EspPlatform::new(pins);

    let net = EspNetworkServices::new(peripherals.modem, sysloop);
    let scanner = net.scanner();

    let mut portal = PortalLifecycle::new(
        config,
        Box::new(scanner),
        Some(Box::new(EspFirmwareUpdater::new())),
        Box::new(net),
        Box::new(platform),
        PortalSettings::default(),
    );

    portal.start()?;
    let router = portal
        .router()
        .ok_or_else(|| anyhow::anyhow!("router missing after start"))?;
    let _server = captive_portal::esp::serve(router, portal.context())?;

    loop {
        portal.handle();
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    // The binary only makes sense on the device; the library and its
    // tests cover the host.
    eprintln!("captive-portal targets ESP-IDF; build for the device.");
}
