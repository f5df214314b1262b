//! Captive-portal configuration core for ESP32-class devices.
//!
//! The device runs a self-contained WiFi access point that forces every
//! connecting client to a configuration web UI: first-time setup,
//! credential rotation, diagnostics and recovery. The stateful core
//! (lifecycle, config store, sessions, auth gate) is platform
//! independent; the ESP-IDF bindings live in [`esp`] and are compiled
//! only for the device target.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod pages;
pub mod portal;
pub mod routes;
pub mod scan;
pub mod session;
pub mod storage;

#[cfg(target_os = "espidf")]
pub mod esp;

pub use error::{PortalError, Result};
pub use portal::{PortalLifecycle, PortalSettings, PortalState};
