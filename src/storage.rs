//! Persistent lamp configuration
//!
//! One flash record holds the last accepted mode and parameters:
//! `magic (u16 LE) | length (u16 LE) | JSON`, where the JSON object is
//! `{"mode","hz","period_ms","brightness"}`. Absent fields fall back to the
//! defaults individually.

use crate::state_machine::{Mode, ModeParams};
use serde::{Deserialize, Serialize};

/// Size of the stored record, word aligned for the flash driver
pub const RECORD_SIZE: usize = 256;
const MAGIC_HEADER: u16 = 0x4C41;
const HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Nothing has been stored yet
    NotFound,
    /// Header or payload could not be read back
    Corrupt,
    /// Parameters did not fit into a record
    Encode,
    /// Flash driver failure
    Driver,
}

/// Last-known configuration storage
pub trait ConfigStore {
    fn load(&mut self) -> Result<ModeParams, StorageError>;
    fn save(&mut self, params: &ModeParams) -> Result<(), StorageError>;
}

#[derive(Serialize)]
struct StoredParams {
    mode: &'static str,
    hz: u32,
    period_ms: u32,
    brightness: u8,
}

#[derive(Deserialize)]
struct LoadedParams<'a> {
    #[serde(default, borrow)]
    mode: Option<&'a str>,
    #[serde(default)]
    hz: Option<i64>,
    #[serde(default)]
    period_ms: Option<i64>,
    #[serde(default)]
    brightness: Option<i64>,
}

/// Serialize parameters into a flash record
pub fn encode_record(params: &ModeParams) -> Result<[u8; RECORD_SIZE], StorageError> {
    let params = params.sanitized();
    let mut record = [0xFF; RECORD_SIZE];

    let len = serde_json_core::to_slice(
        &StoredParams {
            mode: params.mode.as_str(),
            hz: params.blink_hz,
            period_ms: params.breathe_period_ms,
            brightness: params.brightness,
        },
        &mut record[HEADER_SIZE..],
    )
    .map_err(|_| StorageError::Encode)?;

    record[0..2].copy_from_slice(&MAGIC_HEADER.to_le_bytes());
    record[2..4].copy_from_slice(&(len as u16).to_le_bytes());
    Ok(record)
}

/// Read parameters back from a flash record
pub fn decode_record(record: &[u8]) -> Result<ModeParams, StorageError> {
    if record.len() < HEADER_SIZE {
        return Err(StorageError::NotFound);
    }

    let magic = u16::from_le_bytes([record[0], record[1]]);
    if magic != MAGIC_HEADER {
        return Err(StorageError::NotFound);
    }

    let len = u16::from_le_bytes([record[2], record[3]]) as usize;
    let payload = record
        .get(HEADER_SIZE..HEADER_SIZE + len)
        .ok_or(StorageError::Corrupt)?;
    let (loaded, _) = serde_json_core::from_slice::<LoadedParams<'_>>(payload)
        .map_err(|_| StorageError::Corrupt)?;

    let defaults = ModeParams::default();
    let mode = match loaded.mode.and_then(Mode::from_user_str) {
        Some(mode) => mode,
        None => defaults.mode,
    };

    let params = ModeParams {
        mode,
        blink_hz: loaded
            .hz
            .map(|hz| hz.clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(defaults.blink_hz),
        breathe_period_ms: loaded
            .period_ms
            .map(|period| period.clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(defaults.breathe_period_ms),
        brightness: loaded
            .brightness
            .map(|duty| duty.clamp(0, 255) as u8)
            .unwrap_or(defaults.brightness),
    };
    Ok(params.sanitized())
}

#[cfg(feature = "device")]
pub use flash::FlashConfigStore;

#[cfg(feature = "device")]
mod flash {
    use super::{ConfigStore, RECORD_SIZE, StorageError, decode_record, encode_record};
    use crate::config;
    use crate::state_machine::ModeParams;
    use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
    use esp_storage::FlashStorage;

    const SECTOR_SIZE: u32 = 4096;

    /// Config record in a dedicated flash sector
    pub struct FlashConfigStore {
        flash: FlashStorage,
        addr: u32,
    }

    impl FlashConfigStore {
        pub fn new() -> Self {
            Self {
                flash: FlashStorage::new(),
                addr: config::CONFIG_FLASH_OFFSET,
            }
        }
    }

    impl Default for FlashConfigStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ConfigStore for FlashConfigStore {
        fn load(&mut self) -> Result<ModeParams, StorageError> {
            let mut record = [0u8; RECORD_SIZE];
            self.flash
                .read(self.addr, &mut record)
                .map_err(|_| StorageError::Driver)?;
            decode_record(&record)
        }

        fn save(&mut self, params: &ModeParams) -> Result<(), StorageError> {
            let record = encode_record(params)?;
            self.flash
                .erase(self.addr, self.addr + SECTOR_SIZE)
                .map_err(|_| StorageError::Driver)?;
            self.flash
                .write(self.addr, &record)
                .map_err(|_| StorageError::Driver)?;
            log::info!("[STORE] saved {} at 0x{:x}", params.mode.as_str(), self.addr);
            Ok(())
        }
    }
}
