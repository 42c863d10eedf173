#![cfg_attr(not(test), no_std)]

//! ESP32-C3 WebSocket Lamp Board Library
//!
//! This library provides modules for a WiFi access-point lamp: a single PWM
//! LED whose mode is driven by JSON commands over WebSocket and by station
//! connect/disconnect events, with status broadcasting and flash persistence.

pub mod dhcp;
pub mod handler;
pub mod led_control;
pub mod protocol;
pub mod state_machine;
pub mod status;
pub mod storage;
pub mod websocket;
pub mod wifi;

#[cfg(feature = "device")]
pub mod ws_server;

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// Access point configuration
    /// Read from environment variables at compile time
    pub const AP_SSID: &str = env!("AP_SSID");
    pub const AP_PASSWORD: &str = env!("AP_PASSWORD");

    /// Static address of the board on its own network
    pub const AP_IP: [u8; 4] = [192, 168, 4, 1];
    pub const AP_PREFIX_LEN: u8 = 24;

    /// Control page port
    pub const HTTP_PORT: u16 = 80;

    /// WebSocket command/status port
    pub const WS_PORT: u16 = 81;

    /// LED GPIO pin (LEDC low-speed channel 0)
    pub const LED_PIN: u8 = 12;

    /// LEDC PWM frequency, 8-bit resolution
    pub const LEDC_FREQ_HZ: u32 = 5000;

    /// Periodic status broadcast interval
    pub const STATUS_INTERVAL_MS: u64 = 2000;

    /// Output refresh interval
    pub const TICK_INTERVAL_MS: u64 = 5;

    /// Maximum concurrent WebSocket clients
    pub const MAX_CLIENTS: usize = 4;

    /// Maximum inbound/outbound text message size
    pub const MAX_MESSAGE_LEN: usize = 256;

    /// Parameters used when nothing valid is stored
    pub const DEFAULT_BLINK_HZ: u32 = 2;
    pub const DEFAULT_BREATHE_PERIOD_MS: u32 = 1500;
    pub const DEFAULT_BRIGHTNESS: u8 = 128;

    /// Lower bounds applied to command and stored parameters
    pub const MIN_BLINK_HZ: u32 = 1;
    pub const MIN_BREATHE_PERIOD_MS: u32 = 200;

    /// Idle-wait visual: fast breathe at full ceiling, envelope scaled down
    pub const IDLE_PERIOD_MS: u32 = 800;
    pub const IDLE_BRIGHTNESS: u8 = 255;
    pub const IDLE_ENVELOPE_SCALE: f32 = 0.6;

    /// Flash offset of the config sector (the nvs partition of the default table)
    pub const CONFIG_FLASH_OFFSET: u32 = 0x9000;
}

/// Error types for the lamp board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// WiFi access point error
    WiFiError,
    /// WebSocket/HTTP transport error
    TransportError,
    /// Protocol parsing error
    ProtocolError,
    /// LED control error
    LedError,
    /// System error
    SystemError,
}

impl core::fmt::Display for BoardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            BoardError::WiFiError => "wifi error",
            BoardError::TransportError => "transport error",
            BoardError::ProtocolError => "protocol error",
            BoardError::LedError => "led error",
            BoardError::SystemError => "system error",
        };
        f.write_str(text)
    }
}
