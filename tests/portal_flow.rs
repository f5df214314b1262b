//! End-to-end portal behavior over mock network and platform services.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use captive_portal::config::ConfigStore;
use captive_portal::error::{PortalError, Result};
use captive_portal::http::{Request, Response};
use captive_portal::portal::{
    FirmwareUpdater, NetworkServices, PortalLifecycle, PortalPlatform, PortalSettings, PortalState,
};
use captive_portal::scan::{ScanNetwork, WifiScanner};
use captive_portal::storage::MemStorage;

#[derive(Default)]
struct NetLog {
    ap_starts: u32,
    dns_starts: u32,
    stops: u32,
    ssid: String,
    password: String,
}

struct MockNet {
    log: Arc<Mutex<NetLog>>,
    fail_bringup: bool,
}

impl NetworkServices for MockNet {
    fn start_access_point(
        &mut self,
        ssid: &str,
        password: &str,
        _ip: Ipv4Addr,
        _mask: Ipv4Addr,
    ) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.ap_starts += 1;
        log.ssid = ssid.to_string();
        log.password = password.to_string();
        if self.fail_bringup {
            return Err(PortalError::NetworkBringup("no radio".to_string()));
        }
        Ok(())
    }

    fn start_dns_redirect(&mut self, _ip: Ipv4Addr) -> Result<()> {
        self.log.lock().unwrap().dns_starts += 1;
        Ok(())
    }

    fn poll(&mut self) {}

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }
}

#[derive(Default)]
struct PlatformLog {
    restarts: u32,
    timezone: String,
    pins: Option<(u8, u8)>,
}

struct MockPlatform {
    log: Arc<Mutex<PlatformLog>>,
    reset_held: bool,
    reset_asserted: bool,
}

impl MockPlatform {
    fn quiet(log: Arc<Mutex<PlatformLog>>) -> Self {
        Self {
            log,
            reset_held: false,
            reset_asserted: false,
        }
    }
}

impl PortalPlatform for MockPlatform {
    fn apply_timezone(&mut self, tz: &str) {
        self.log.lock().unwrap().timezone = tz.to_string();
    }

    fn configure_pins(&mut self, led_pin: u8, reset_pin: u8, _rgb: Option<u8>) -> Result<()> {
        self.log.lock().unwrap().pins = Some((led_pin, reset_pin));
        Ok(())
    }

    fn reset_button_held(&mut self, _hold: Duration) -> bool {
        self.reset_held
    }

    fn reset_asserted(&mut self) -> bool {
        self.reset_asserted
    }

    fn delay(&mut self, _d: Duration) {}

    fn restart(&mut self) {
        self.log.lock().unwrap().restarts += 1;
    }
}

struct NoScan;

impl WifiScanner for NoScan {
    fn start_scan(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_scan(&mut self) -> Result<Option<Vec<ScanNetwork>>> {
        Ok(Some(Vec::new()))
    }
}

/// Scan that needs `ticks` service-loop polls before yielding a result.
struct SlowScan {
    ticks: u32,
}

impl WifiScanner for SlowScan {
    fn start_scan(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_scan(&mut self) -> Result<Option<Vec<ScanNetwork>>> {
        if self.ticks > 0 {
            self.ticks -= 1;
            return Ok(None);
        }
        Ok(Some(vec![ScanNetwork {
            ssid: "HomeNet".to_string(),
            rssi: -50,
            secure: true,
        }]))
    }
}

#[derive(Default)]
struct MockUpdater {
    image: Arc<Mutex<Vec<u8>>>,
    chunks: Arc<Mutex<Vec<usize>>>,
}

impl FirmwareUpdater for MockUpdater {
    fn begin(&mut self) -> Result<()> {
        self.image.lock().unwrap().clear();
        self.chunks.lock().unwrap().clear();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.image.lock().unwrap().extend_from_slice(chunk);
        self.chunks.lock().unwrap().push(chunk.len());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    portal: PortalLifecycle,
    net_log: Arc<Mutex<NetLog>>,
    platform_log: Arc<Mutex<PlatformLog>>,
    image: Arc<Mutex<Vec<u8>>>,
    chunks: Arc<Mutex<Vec<usize>>>,
}

fn harness_with(
    storage: MemStorage,
    fail_bringup: bool,
    scanner: Box<dyn WifiScanner>,
    platform: impl FnOnce(Arc<Mutex<PlatformLog>>) -> MockPlatform,
) -> Harness {
    let net_log = Arc::new(Mutex::new(NetLog::default()));
    let platform_log = Arc::new(Mutex::new(PlatformLog::default()));
    let image = Arc::new(Mutex::new(Vec::new()));
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let portal = PortalLifecycle::new(
        ConfigStore::new(Box::new(storage)),
        scanner,
        Some(Box::new(MockUpdater {
            image: image.clone(),
            chunks: chunks.clone(),
        })),
        Box::new(MockNet {
            log: net_log.clone(),
            fail_bringup,
        }),
        Box::new(platform(platform_log.clone())),
        PortalSettings::default(),
    );
    Harness {
        portal,
        net_log,
        platform_log,
        image,
        chunks,
    }
}

fn harness() -> Harness {
    harness_with(MemStorage::new(), false, Box::new(NoScan), MockPlatform::quiet)
}

fn cookie_of(resp: &Response) -> String {
    let set_cookie = resp.header("Set-Cookie").expect("Set-Cookie missing");
    set_cookie.split(';').next().unwrap().to_string()
}

fn login(portal: &PortalLifecycle, user: &str, pass: &str) -> Response {
    let router = portal.router().unwrap();
    router.dispatch(
        &Request::post("/login")
            .with_form("user", user)
            .with_form("pass", pass),
    )
}

/// Logs in and rotates the default password; returns a session cookie for
/// the rotated credentials.
fn provision(harness: &mut Harness, newpass: &str) -> String {
    harness.portal.start().unwrap();
    let router = harness.portal.router().unwrap();

    let prompt = login(&harness.portal, "Admin", "password");
    assert_eq!(prompt.status, 200);
    let cookie = cookie_of(&prompt);

    let rotated = router.dispatch(
        &Request::post("/updatepass")
            .with_header("Cookie", &cookie)
            .with_form("newpass", newpass),
    );
    assert_eq!(rotated.status, 302);

    let home = login(&harness.portal, "Admin", newpass);
    assert_eq!(home.status, 302);
    assert_eq!(home.header("Location").unwrap(), "/home");
    cookie_of(&home)
}

#[test]
fn first_run_bootstraps_defaults_and_forces_rotation() {
    let mut h = harness();
    h.portal.start().unwrap();
    assert_eq!(h.portal.state(), PortalState::Running);

    // Self-healed config: AP up with factory credentials.
    {
        let net = h.net_log.lock().unwrap();
        assert_eq!(net.ap_starts, 1);
        assert_eq!(net.dns_starts, 1);
        assert_eq!(net.ssid, "esp32-portal");
        assert_eq!(net.password, "password");
    }
    assert_eq!(h.platform_log.lock().unwrap().timezone, "Europe/Amsterdam");
    assert_eq!(h.platform_log.lock().unwrap().pins, Some((2, 4)));

    // Un-rotated credentials get the change-password prompt, with a
    // session so the protected /updatepass is reachable.
    let prompt = login(&h.portal, "Admin", "password");
    assert_eq!(prompt.status, 200);
    assert!(prompt.body.contains("Default password in use"));
    assert!(prompt.header("Set-Cookie").is_some());
}

#[test]
fn login_and_protected_routes() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    // With the cookie, protected pages answer.
    let home = router.dispatch(&Request::get("/home").with_header("Cookie", &cookie));
    assert_eq!(home.status, 200);

    // Without it, they redirect to login.
    let denied = router.dispatch(&Request::get("/home"));
    assert_eq!(denied.status, 302);
    assert_eq!(denied.header("Location").unwrap(), "/login");

    // Wrong credentials are rejected outright.
    let bad = login(&h.portal, "Admin", "wrong-pass");
    assert_eq!(bad.status, 403);

    // Logout invalidates the session.
    let out = router.dispatch(&Request::post("/logout").with_header("Cookie", &cookie));
    assert_eq!(out.status, 302);
    assert!(out.header("Set-Cookie").unwrap().contains("Max-Age=0"));
    let denied = router.dispatch(&Request::get("/home").with_header("Cookie", &cookie));
    assert_eq!(denied.status, 302);
}

#[test]
fn short_password_is_rejected_without_state_change() {
    let mut h = harness();
    h.portal.start().unwrap();
    let router = h.portal.router().unwrap();

    let prompt = login(&h.portal, "Admin", "password");
    let cookie = cookie_of(&prompt);

    let short = router.dispatch(
        &Request::post("/updatepass")
            .with_header("Cookie", &cookie)
            .with_form("newpass", "short"),
    );
    assert_eq!(short.status, 400);

    // Session and stored credentials are untouched.
    let home = router.dispatch(&Request::get("/home").with_header("Cookie", &cookie));
    assert_eq!(home.status, 200);
    assert_eq!(login(&h.portal, "Admin", "password").status, 200);
}

#[test]
fn start_is_idempotent() {
    let mut h = harness();
    h.portal.start().unwrap();
    h.portal.start().unwrap();
    assert_eq!(h.portal.state(), PortalState::Running);
    let net = h.net_log.lock().unwrap();
    assert_eq!(net.ap_starts, 1);
    assert_eq!(net.dns_starts, 1);
}

#[test]
fn stop_tears_down_and_is_idempotent() {
    let mut h = harness();
    h.portal.start().unwrap();
    h.portal.stop();
    assert_eq!(h.portal.state(), PortalState::Stopped);
    h.portal.stop();
    assert_eq!(h.net_log.lock().unwrap().stops, 1);
    // Routes survive a stop.
    assert!(h.portal.router().is_some());
}

#[test]
fn mount_failure_is_fatal() {
    let mut storage = MemStorage::new();
    storage.fail_mount = true;
    let mut h = harness_with(storage, false, Box::new(NoScan), MockPlatform::quiet);

    let err = h.portal.start().unwrap_err();
    assert!(matches!(err, PortalError::StorageMount(_)));
    assert_eq!(h.platform_log.lock().unwrap().restarts, 1);
    assert_eq!(h.portal.state(), PortalState::Stopped);
}

#[test]
fn bringup_failure_retries_then_restarts() {
    let mut h = harness_with(MemStorage::new(), true, Box::new(NoScan), MockPlatform::quiet);
    let err = h.portal.start().unwrap_err();
    assert!(matches!(err, PortalError::NetworkBringup(_)));
    assert_eq!(h.net_log.lock().unwrap().ap_starts, 3);
    assert_eq!(h.platform_log.lock().unwrap().restarts, 1);
}

#[test]
fn reset_button_held_at_startup_restores_factory_defaults() {
    // Seed a rotated credential set.
    let mut storage = MemStorage::new();
    {
        let mut seed = ConfigStore::new(Box::new(MemStorage::new()));
        seed.mount().unwrap();
        seed.record_mut().admin_password = "rotated-pass".to_string();
        seed.save(false).unwrap();
        let doc = seed.read_file("config.json").unwrap().unwrap();
        use captive_portal::storage::StorageBackend;
        storage.mount().unwrap();
        storage.write("config.json", &doc).unwrap();
    }

    let mut h = harness_with(storage, false, Box::new(NoScan), |log| MockPlatform {
        log,
        reset_held: true,
        reset_asserted: false,
    });
    h.portal.start().unwrap();

    // AP came up with factory credentials again.
    assert_eq!(h.net_log.lock().unwrap().password, "password");
    let ctx = h.portal.context();
    assert!(ctx.lock().unwrap().config.check_factory_reset_marker());
}

#[test]
fn runtime_reset_assertion_restarts_device() {
    let mut h = harness_with(MemStorage::new(), false, Box::new(NoScan), |log| MockPlatform {
        log,
        reset_held: false,
        reset_asserted: true,
    });
    h.portal.start().unwrap();
    h.portal.handle();
    assert_eq!(h.platform_log.lock().unwrap().restarts, 1);
}

#[test]
fn reboot_route_queues_restart_for_next_tick() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    let resp = router.dispatch(&Request::post("/reboot").with_header("Cookie", &cookie));
    assert_eq!(resp.status, 200);
    // Nothing happened inside the handler...
    assert_eq!(h.platform_log.lock().unwrap().restarts, 0);
    // ...the next tick executes it.
    h.portal.handle();
    assert_eq!(h.platform_log.lock().unwrap().restarts, 1);
}

#[test]
fn factory_reset_route_wipes_config_and_restarts() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    let resp = router.dispatch(&Request::post("/factoryreset").with_header("Cookie", &cookie));
    assert_eq!(resp.status, 200);
    h.portal.handle();

    assert_eq!(h.platform_log.lock().unwrap().restarts, 1);
    let ctx = h.portal.context();
    let ctx = ctx.lock().unwrap();
    assert!(!ctx.config.exists());
    assert!(ctx.config.check_factory_reset_marker());
    assert_eq!(ctx.config.record().admin_password, "password");
}

#[test]
fn firmware_upload_streams_into_updater() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    let resp = router.dispatch(
        &Request::post("/update")
            .with_header("Cookie", &cookie)
            .with_body(vec![0xE9, 0x01, 0x02, 0x03]),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(h.image.lock().unwrap().as_slice(), &[0xE9, 0x01, 0x02, 0x03]);
    // Success schedules a reboot.
    h.portal.handle();
    assert_eq!(h.platform_log.lock().unwrap().restarts, 1);
}

#[test]
fn file_editing_and_listing() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    let save = router.dispatch(
        &Request::post("/editfile")
            .with_header("Cookie", &cookie)
            .with_form("name", "home.html")
            .with_form("content", "<p>hi</p>"),
    );
    assert_eq!(save.status, 200);

    let read = router.dispatch(
        &Request::get("/editfile")
            .with_header("Cookie", &cookie)
            .with_form("name", "home.html"),
    );
    assert_eq!(read.status, 200);
    assert_eq!(read.body, "<p>hi</p>");

    let missing = router.dispatch(
        &Request::get("/editfile")
            .with_header("Cookie", &cookie)
            .with_form("name", "nope.html"),
    );
    assert_eq!(missing.status, 404);

    let list = router.dispatch(&Request::get("/listfiles").with_header("Cookie", &cookie));
    assert_eq!(list.status, 200);
    assert!(list.body.contains("home.html"));
    assert!(list.body.contains("config.json"));
}

#[test]
fn device_name_roundtrip_changes_ssid_source() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    let get = router.dispatch(&Request::get("/devicename").with_header("Cookie", &cookie));
    assert!(get.body.contains("esp32-portal"));

    let post = router.dispatch(
        &Request::post("/devicename")
            .with_header("Cookie", &cookie)
            .with_form("name", "Workshop"),
    );
    assert_eq!(post.status, 200);

    let get = router.dispatch(&Request::get("/devicename").with_header("Cookie", &cookie));
    assert!(get.body.contains("Workshop"));

    // Persisted: a fresh load sees it.
    let ctx = h.portal.context();
    let mut ctx = ctx.lock().unwrap();
    ctx.config.load().unwrap();
    assert_eq!(ctx.config.record().effective_device_name(), "Workshop");
}

#[test]
fn wifiscan_route_reports_results() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    // NoScan completes immediately with an empty list.
    let resp = router.dispatch(&Request::get("/wifiscan").with_header("Cookie", &cookie));
    assert_eq!(resp.status, 200);
    assert!(resp.body.contains(r#""status":"ready""#));
    assert!(resp.body.contains(r#""networks":[]"#));
}

#[test]
fn wifiscan_results_survive_completion_between_requests() {
    let mut h = harness_with(
        MemStorage::new(),
        false,
        Box::new(SlowScan { ticks: 1 }),
        MockPlatform::quiet,
    );
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    let first = router.dispatch(&Request::get("/wifiscan").with_header("Cookie", &cookie));
    assert!(first.body.contains(r#""status":"running""#));

    // The scan finishes on a service-loop tick, between requests.
    h.portal.handle();

    // The finished results must be reported, not discarded by a restart.
    let second = router.dispatch(&Request::get("/wifiscan").with_header("Cookie", &cookie));
    assert!(second.body.contains(r#""status":"ready""#));
    assert!(second.body.contains("HomeNet"));

    // Consumed; the next request starts a fresh scan, which this scanner
    // now completes immediately.
    let third = router.dispatch(&Request::get("/wifiscan").with_header("Cookie", &cookie));
    assert!(third.body.contains(r#""status":"ready""#));
}

#[test]
fn firmware_upload_is_written_in_bounded_chunks() {
    let mut h = harness();
    let cookie = provision(&mut h, "longenough1");
    let router = h.portal.router().unwrap();

    let image: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let resp = router.dispatch(
        &Request::post("/update")
            .with_header("Cookie", &cookie)
            .with_body(image.clone()),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(*h.image.lock().unwrap(), image);

    // The updater saw the image as a sequence of bounded chunks, never as
    // one allocation-sized write.
    let chunks = h.chunks.lock().unwrap();
    assert!(chunks.len() >= 3);
    assert!(chunks.iter().all(|&n| n <= 4096));
}

#[test]
fn unmatched_paths_get_captive_redirect() {
    let mut h = harness();
    h.portal.start().unwrap();
    let router = h.portal.router().unwrap();

    for path in ["/generate_204", "/fwlink", "/hotspot-detect.html", "/random"] {
        let resp = router.dispatch(&Request::get(path));
        assert_eq!(resp.status, 302);
        assert_eq!(resp.header("Location").unwrap(), "http://192.168.4.1/");
    }
}
