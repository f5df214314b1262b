//! OTA firmware sink over the ESP-IDF app-update API.

use esp_idf_svc::sys::{
    esp, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write, esp_partition_t,
    OTA_SIZE_UNKNOWN,
};

use crate::error::{PortalError, Result};
use crate::portal::FirmwareUpdater;

/// Streams an uploaded image into the next OTA partition and switches the
/// boot partition on completion.
pub struct EspFirmwareUpdater {
    handle: Option<esp_ota_handle_t>,
    partition: *const esp_partition_t,
    written: usize,
}

// The partition pointer is a static table entry owned by ESP-IDF.
unsafe impl Send for EspFirmwareUpdater {}

impl EspFirmwareUpdater {
    pub fn new() -> Self {
        Self {
            handle: None,
            partition: std::ptr::null(),
            written: 0,
        }
    }
}

impl Default for EspFirmwareUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareUpdater for EspFirmwareUpdater {
    fn begin(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            // A previous upload never finished; discard it.
            unsafe { esp_ota_abort(handle) };
        }
        let partition = unsafe { esp_ota_get_next_update_partition(std::ptr::null()) };
        if partition.is_null() {
            return Err(ota_err("no OTA partition available"));
        }
        let mut handle: esp_ota_handle_t = 0;
        esp!(unsafe { esp_ota_begin(partition, OTA_SIZE_UNKNOWN as usize, &mut handle) })
            .map_err(|e| ota_err(&e.to_string()))?;
        self.partition = partition;
        self.handle = Some(handle);
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let handle = self.handle.ok_or_else(|| ota_err("update not started"))?;
        esp!(unsafe { esp_ota_write(handle, chunk.as_ptr().cast(), chunk.len()) })
            .map_err(|e| ota_err(&e.to_string()))?;
        self.written += chunk.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let handle = self.handle.take().ok_or_else(|| ota_err("update not started"))?;
        esp!(unsafe { esp_ota_end(handle) }).map_err(|e| ota_err(&e.to_string()))?;
        esp!(unsafe { esp_ota_set_boot_partition(self.partition) })
            .map_err(|e| ota_err(&e.to_string()))?;
        log::info!("[OTA] {} bytes written, boot partition switched", self.written);
        Ok(())
    }
}

fn ota_err(reason: &str) -> PortalError {
    PortalError::Validation {
        field: "ota".to_string(),
        reason: reason.to_string(),
    }
}
