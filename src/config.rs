//! Persisted device identity and settings.
//!
//! A single JSON document (`config.json`) on the backing store holds two
//! groups, `user` and `device`. Every field has a compiled-in default; a
//! persisted document may omit any field and the default is retained
//! (merge-on-load, never null). The in-memory [`ConfigRecord`] owned by the
//! lifecycle is the sole mutable source of truth.

use std::net::Ipv4Addr;

use serde_json::{json, Map, Value};

use crate::error::{PortalError, Result};
use crate::storage::{FileEntry, StorageBackend};

/// Path of the configuration document on the backing store.
pub const CONFIG_FILE: &str = "config.json";
/// Sentinel file signalling that a factory reset occurred. A collaborator
/// outside the core clears it after acting on it.
pub const FACTORY_RESET_MARKER: &str = ".factory_reset";

const ADMIN_USER: &str = "Admin";
const ADMIN_PASSWORD: &str = "password";
const DEVICE_HOSTNAME: &str = "esp32-portal";
const DEVICE_TIMEZONE: &str = "Europe/Amsterdam";
const LED_PIN: u8 = 2;
const RESET_PIN: u8 = 4;
const RGB_BRIGHTNESS: u8 = 64;

/// The device's persisted identity and policy, with compiled-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub admin_user: String,
    pub admin_password: String,
    /// Distinguished value used to detect un-rotated credentials.
    pub default_password: String,
    pub hostname: String,
    /// Optional user-chosen display name; empty means "use the hostname".
    pub device_name: String,
    pub timezone: String,
    pub ip: Ipv4Addr,
    pub ip_mask: Ipv4Addr,
    pub led_pin: u8,
    pub has_rgb_led: bool,
    pub rgb_brightness: u8,
    pub reset_pin: u8,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            admin_user: ADMIN_USER.to_string(),
            admin_password: ADMIN_PASSWORD.to_string(),
            default_password: ADMIN_PASSWORD.to_string(),
            hostname: DEVICE_HOSTNAME.to_string(),
            device_name: String::new(),
            timezone: DEVICE_TIMEZONE.to_string(),
            ip: Ipv4Addr::new(192, 168, 4, 1),
            ip_mask: Ipv4Addr::new(255, 255, 255, 0),
            led_pin: LED_PIN,
            has_rgb_led: false,
            rgb_brightness: RGB_BRIGHTNESS,
            reset_pin: RESET_PIN,
        }
    }
}

impl ConfigRecord {
    /// Display name if the user picked one, else the hostname.
    pub fn effective_device_name(&self) -> &str {
        if self.device_name.is_empty() {
            &self.hostname
        } else {
            &self.device_name
        }
    }

    /// True while the stored password equals the distinguished default.
    pub fn password_is_default(&self) -> bool {
        self.admin_password == self.default_password
    }
}

/// A tagged configuration value. Callers choose the type explicitly;
/// [`ConfigValue::parse`] carries the documented text coercion for callers
/// holding raw form input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ConfigValue {
    /// Infers a type from the string form: case-insensitive "true"/"false"
    /// become booleans, an optional leading minus with an all-digit body
    /// becomes an integer, anything else is text. This coercion is a
    /// deliberate simplification; do not special-case it further.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("true") {
            return ConfigValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return ConfigValue::Bool(false);
        }
        let body = s.strip_prefix('-').unwrap_or(s);
        if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = s.parse::<i64>() {
                return ConfigValue::Int(n);
            }
        }
        ConfigValue::Text(s.to_string())
    }

    fn to_json(&self) -> Value {
        match self {
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Int(n) => json!(n),
            ConfigValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Type-aware comparison against a document node.
    fn matches(&self, node: &Value) -> bool {
        match (self, node) {
            (ConfigValue::Bool(b), Value::Bool(v)) => b == v,
            (ConfigValue::Int(n), Value::Number(v)) => v.as_i64() == Some(*n),
            (ConfigValue::Text(s), Value::String(v)) => s == v,
            _ => false,
        }
    }
}

/// Schema-less, dot-addressed persisted key/value store plus the typed
/// [`ConfigRecord`] view of it.
pub struct ConfigStore {
    backend: Box<dyn StorageBackend>,
    record: ConfigRecord,
    /// Reformat the whole partition on factory reset instead of deleting
    /// just the document.
    format_on_reset: bool,
}

impl ConfigStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            record: ConfigRecord::default(),
            format_on_reset: false,
        }
    }

    pub fn with_format_on_reset(mut self, format_on_reset: bool) -> Self {
        self.format_on_reset = format_on_reset;
        self
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }

    /// Mounts the backing store if not already mounted.
    pub fn mount(&mut self) -> Result<()> {
        self.backend.mount()
    }

    /// True iff the backing document is present.
    pub fn exists(&self) -> bool {
        self.backend.exists(CONFIG_FILE)
    }

    /// Reads the file named `name` from the backing store (UI assets, the
    /// editfile route).
    pub fn read_file(&self, name: &str) -> Result<Option<String>> {
        self.backend.read(name)
    }

    pub fn write_file(&mut self, name: &str, contents: &str) -> Result<()> {
        self.backend.write(name, contents)
    }

    pub fn list_files(&self) -> Result<Vec<FileEntry>> {
        self.backend.list()
    }

    /// Loads the persisted document, overlaying every recognized field onto
    /// the in-memory record. Missing fields keep their current value. A
    /// present-but-malformed IP or mask fails the whole load and leaves the
    /// record untouched.
    pub fn load(&mut self) -> Result<()> {
        self.backend.mount()?;

        let raw = self
            .backend
            .read(CONFIG_FILE)?
            .ok_or_else(|| PortalError::ConfigParse(format!("{CONFIG_FILE} missing")))?;
        let doc: Value =
            serde_json::from_str(&raw).map_err(|e| PortalError::ConfigParse(e.to_string()))?;

        // Stage everything before committing so a malformed field cannot
        // leave the record half-updated.
        let mut staged = self.record.clone();

        if let Some(s) = str_at(&doc, "user.name") {
            staged.admin_user = s.to_string();
        }
        if let Some(s) = str_at(&doc, "user.pass") {
            staged.admin_password = s.to_string();
        }
        if let Some(s) = str_at(&doc, "user.defaultPass") {
            staged.default_password = s.to_string();
        }
        if let Some(s) = str_at(&doc, "device.hostname") {
            staged.hostname = s.to_string();
        }
        if let Some(s) = str_at(&doc, "device.name") {
            staged.device_name = s.to_string();
        }
        if let Some(s) = str_at(&doc, "device.timezone") {
            staged.timezone = s.to_string();
        }
        if let Some(ip) = ip_at(&doc, "device.IP")? {
            staged.ip = ip;
        }
        if let Some(mask) = ip_at(&doc, "device.IPMask")? {
            staged.ip_mask = mask;
        }
        if let Some(n) = pin_at(&doc, "device.ledPin")? {
            staged.led_pin = n;
        }
        if let Some(v) = resolve(&doc, "device.hasRgbLed").and_then(Value::as_bool) {
            staged.has_rgb_led = v;
        }
        if let Some(n) = pin_at(&doc, "device.rgbBrightness")? {
            staged.rgb_brightness = n;
        }
        if let Some(n) = pin_at(&doc, "device.resetPin")? {
            staged.reset_pin = n;
        }

        self.record = staged;
        log::info!("Config loaded for '{}'", self.record.effective_device_name());
        Ok(())
    }

    /// Serializes the full in-memory record. With `use_default_password`
    /// the persisted password is forced to the default password (first-run
    /// bootstrapping only). A failed save leaves the in-memory state
    /// unaffected.
    pub fn save(&mut self, use_default_password: bool) -> Result<()> {
        self.backend.mount()?;
        let r = &self.record;
        let pass = if use_default_password {
            &r.default_password
        } else {
            &r.admin_password
        };
        let doc = json!({
            "user": {
                "name": r.admin_user,
                "pass": pass,
                "defaultPass": r.default_password,
            },
            "device": {
                "name": r.device_name,
                "hostname": r.hostname,
                "timezone": r.timezone,
                "IP": r.ip.to_string(),
                "IPMask": r.ip_mask.to_string(),
                "ledPin": r.led_pin,
                "hasRgbLed": r.has_rgb_led,
                "rgbBrightness": r.rgb_brightness,
                "resetPin": r.reset_pin,
            },
        });
        let out = serde_json::to_string_pretty(&doc)?;
        self.backend.write(CONFIG_FILE, &out)?;
        log::info!("Config file saved");
        Ok(())
    }

    /// Set-if-absent: returns `false` without writing when the dot-path
    /// already resolves. Used for schema migration.
    pub fn add(&mut self, key: &str, value: ConfigValue) -> Result<bool> {
        let mut doc = self.open_document()?;
        if resolve(&doc, key).is_some() {
            return Ok(false);
        }
        set_path(&mut doc, key, value.to_json());
        self.write_document(&doc)?;
        Ok(true)
    }

    /// Writes `value` at the dot-path, creating intermediate nodes as
    /// needed and overwriting any existing value.
    pub fn set(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        let mut doc = self.open_document()?;
        set_path(&mut doc, key, value.to_json());
        self.write_document(&doc)
    }

    /// True iff the dot-path resolves and its value equals `expected`,
    /// compared with type awareness.
    pub fn exist(&self, key: &str, expected: &ConfigValue) -> bool {
        match self.open_document() {
            Ok(doc) => resolve(&doc, key).is_some_and(|node| expected.matches(node)),
            Err(_) => false,
        }
    }

    /// Unsigned integer at the dot-path, or `default` if absent,
    /// wrong-typed, unparseable or negative.
    pub fn get_uint(&self, key: &str, default: u32) -> u32 {
        let Ok(doc) = self.open_document() else {
            return default;
        };
        match resolve(&doc, key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default),
            Some(Value::String(s)) => s.parse::<u32>().unwrap_or(default),
            _ => default,
        }
    }

    /// Discards the persisted document (or reformats the partition,
    /// depending on policy), resets the in-memory record to the compiled
    /// defaults and writes the factory-reset marker.
    pub fn reset_to_factory_default(&mut self) -> Result<()> {
        log::warn!("Factory reset requested");
        self.backend.mount()?;
        if self.format_on_reset {
            self.backend.format()?;
        } else {
            self.backend.remove(CONFIG_FILE)?;
        }
        self.record = ConfigRecord::default();
        self.backend.write(FACTORY_RESET_MARKER, "1")?;
        Ok(())
    }

    /// True iff the marker exists. Removal is collaborator-owned.
    pub fn check_factory_reset_marker(&self) -> bool {
        self.backend.exists(FACTORY_RESET_MARKER)
    }

    pub fn clear_factory_reset_marker(&mut self) -> Result<()> {
        self.backend.remove(FACTORY_RESET_MARKER)
    }

    /// Persists a new display name immediately.
    pub fn set_device_name(&mut self, name: &str) -> Result<()> {
        self.record.device_name = name.to_string();
        self.save(false)
    }

    /// Credentials as persisted, read fresh from the document. The login
    /// handler checks against the document rather than memory so an edit
    /// through `/editfile` takes effect without a reboot.
    pub fn read_credentials(&self) -> Result<(String, String)> {
        let doc = self.open_document()?;
        let user = str_at(&doc, "user.name")
            .ok_or_else(|| PortalError::ConfigParse("user.name missing".to_string()))?
            .to_string();
        let pass = str_at(&doc, "user.pass")
            .ok_or_else(|| PortalError::ConfigParse("user.pass missing".to_string()))?
            .to_string();
        Ok((user, pass))
    }

    /// Rewrites `user.pass` in the document and the in-memory record.
    pub fn update_password(&mut self, newpass: &str) -> Result<()> {
        let mut doc = self.open_document()?;
        set_path(&mut doc, "user.pass", Value::String(newpass.to_string()));
        self.write_document(&doc)?;
        self.record.admin_password = newpass.to_string();
        Ok(())
    }

    fn open_document(&self) -> Result<Value> {
        match self.backend.read(CONFIG_FILE)? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| PortalError::ConfigParse(e.to_string()))
            }
            None => Ok(Value::Object(Map::new())),
        }
    }

    fn write_document(&mut self, doc: &Value) -> Result<()> {
        let out = serde_json::to_string_pretty(doc)?;
        self.backend.write(CONFIG_FILE, &out)
    }
}

fn parse_ip(field: &str, s: &str) -> Result<Ipv4Addr> {
    s.parse::<Ipv4Addr>().map_err(|_| PortalError::Validation {
        field: field.to_string(),
        reason: format!("'{s}' is not a dotted quad"),
    })
}

/// A present-but-non-string node fails validation the same way a malformed
/// string does.
fn ip_at(doc: &Value, path: &str) -> Result<Option<Ipv4Addr>> {
    match resolve(doc, path) {
        None => Ok(None),
        Some(node) => {
            let s = node.as_str().ok_or_else(|| PortalError::Validation {
                field: path.to_string(),
                reason: format!("'{node}' is not a dotted quad"),
            })?;
            parse_ip(path, s).map(Some)
        }
    }
}

fn pin_at(doc: &Value, path: &str) -> Result<Option<u8>> {
    match resolve(doc, path) {
        None => Ok(None),
        Some(node) => {
            let n = node
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| PortalError::Validation {
                    field: path.to_string(),
                    reason: format!("'{node}' is not a pin number"),
                })?;
            Ok(Some(n))
        }
    }
}

fn str_at<'a>(doc: &'a Value, path: &str) -> Option<&'a str> {
    resolve(doc, path).and_then(Value::as_str)
}

/// Resolves a dot-path against a document.
fn resolve<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = doc;
    for segment in path.split('.') {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Writes `value` at the dot-path, replacing non-object intermediates with
/// objects as needed.
fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut node = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let map = node.as_object_mut().unwrap();
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
