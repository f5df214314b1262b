//! Device-side platform seam: GPIO roles, reset signal, timezone, restart.

use std::time::{Duration, Instant};

use esp_idf_svc::hal::gpio::{AnyIOPin, Input, Output, PinDriver, Pull};

use crate::error::{PortalError, Result};
use crate::portal::PortalPlatform;

pub struct EspPlatform {
    led: Option<PinDriver<'static, AnyIOPin, Output>>,
    reset: Option<PinDriver<'static, AnyIOPin, Input>>,
    pins: Vec<AnyIOPin>,
}

impl EspPlatform {
    /// `pins` are the IO pins the config record may assign roles to,
    /// indexed by GPIO number.
    pub fn new(pins: Vec<AnyIOPin>) -> Self {
        Self {
            led: None,
            reset: None,
            pins,
        }
    }

    fn take_pin(&mut self, number: u8) -> Result<AnyIOPin> {
        let idx = self
            .pins
            .iter()
            .position(|p| pin_number(p) == i32::from(number))
            .ok_or_else(|| PortalError::Validation {
                field: "pin".to_string(),
                reason: format!("GPIO{number} not available"),
            })?;
        Ok(self.pins.swap_remove(idx))
    }
}

fn pin_number(pin: &AnyIOPin) -> i32 {
    use esp_idf_svc::hal::gpio::Pin;
    pin.pin()
}

impl PortalPlatform for EspPlatform {
    fn apply_timezone(&mut self, tz: &str) {
        // newlib reads TZ; applies to all subsequent localtime calls.
        std::env::set_var("TZ", tz);
        log::info!("Timezone set to {tz}");
    }

    fn configure_pins(&mut self, led_pin: u8, reset_pin: u8, rgb: Option<u8>) -> Result<()> {
        let led = self.take_pin(led_pin)?;
        self.led = Some(
            PinDriver::output(led).map_err(|e| PortalError::Validation {
                field: "device.ledPin".to_string(),
                reason: e.to_string(),
            })?,
        );

        let reset = self.take_pin(reset_pin)?;
        let mut reset = PinDriver::input(reset).map_err(|e| PortalError::Validation {
            field: "device.resetPin".to_string(),
            reason: e.to_string(),
        })?;
        reset
            .set_pull(Pull::Up)
            .map_err(|e| PortalError::Validation {
                field: "device.resetPin".to_string(),
                reason: e.to_string(),
            })?;
        self.reset = Some(reset);

        if let Some(brightness) = rgb {
            // The RGB indicator is driven by the LED module elsewhere;
            // only the parameters come from config.
            log::info!("RGB indicator enabled, brightness {brightness}");
        }
        Ok(())
    }

    fn reset_button_held(&mut self, hold: Duration) -> bool {
        let Some(reset) = self.reset.as_ref() else {
            return false;
        };
        if reset.is_high() {
            return false;
        }
        log::info!("Reset button down, waiting {}s to confirm", hold.as_secs());
        let start = Instant::now();
        while reset.is_low() {
            if start.elapsed() >= hold {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    fn reset_asserted(&mut self) -> bool {
        self.reset.as_ref().is_some_and(|p| p.is_low())
    }

    fn delay(&mut self, d: Duration) {
        std::thread::sleep(d);
    }

    fn restart(&mut self) {
        log::warn!("Restarting device");
        unsafe { esp_idf_svc::sys::esp_restart() }
    }
}
