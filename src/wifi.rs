//! WiFi module for ESP32-C3 board
//!
//! Runs the soft access point with esp-wifi 0.14.1 and tracks how many
//! stations are associated. The count feeds the idle-wait logic through
//! [`LinkMonitor`] and [`StationMonitor`].

/// Station-level view of the access point
pub trait LinkMonitor {
    /// Number of stations currently associated
    fn current_station_count(&self) -> u8;

    /// Signal strength in dBm; 0 when not available
    fn rssi(&self) -> i32 {
        0
    }
}

/// Edge in the associated-station count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEdge {
    /// First station joined
    Associated,
    /// Last station left
    AllLeft,
}

/// Turns station count updates into connect/disconnect edges
#[derive(Debug, Default)]
pub struct StationMonitor {
    last_count: u8,
}

impl StationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new station count; returns an edge when crossing zero
    pub fn observe(&mut self, count: u8) -> Option<LinkEdge> {
        let previous = self.last_count;
        self.last_count = count;
        match (previous, count) {
            (0, n) if n > 0 => Some(LinkEdge::Associated),
            (p, 0) if p > 0 => Some(LinkEdge::AllLeft),
            _ => None,
        }
    }
}

#[cfg(feature = "device")]
pub use ap::{AccessPoint, ApLinkMonitor};

#[cfg(feature = "device")]
mod ap {
    use super::LinkMonitor;
    use crate::{BoardError, config};
    use core::sync::atomic::{AtomicU8, Ordering};
    use esp_wifi::wifi::{
        AccessPointConfiguration, AuthMethod, Configuration, WifiController, WifiEvent,
    };

    static STATION_COUNT: AtomicU8 = AtomicU8::new(0);

    /// Station count published by the access point task
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ApLinkMonitor;

    impl LinkMonitor for ApLinkMonitor {
        fn current_station_count(&self) -> u8 {
            STATION_COUNT.load(Ordering::Relaxed)
        }
    }

    /// Soft access point manager
    pub struct AccessPoint<'a> {
        controller: WifiController<'a>,
    }

    impl<'a> AccessPoint<'a> {
        /// Create a new access point manager
        pub fn new(controller: WifiController<'a>) -> Self {
            Self { controller }
        }

        /// Configure and start the access point
        pub async fn start(&mut self) -> Result<(), BoardError> {
            log::info!("[WIFI] Starting access point: {}", config::AP_SSID);

            // WPA2 needs at least 8 characters, shorter passwords leave the AP open
            let (password, auth_method) = if config::AP_PASSWORD.len() >= 8 {
                (config::AP_PASSWORD, AuthMethod::WPA2Personal)
            } else {
                log::warn!("[WIFI] Password too short, starting an open access point");
                ("", AuthMethod::None)
            };

            let ap_config = AccessPointConfiguration {
                ssid: config::AP_SSID.try_into().map_err(|_| BoardError::WiFiError)?,
                password: password.try_into().map_err(|_| BoardError::WiFiError)?,
                auth_method,
                max_connections: config::MAX_CLIENTS as u16,
                ..Default::default()
            };

            self.controller
                .set_configuration(&Configuration::AccessPoint(ap_config))
                .map_err(|_| BoardError::WiFiError)?;
            self.controller
                .start_async()
                .await
                .map_err(|_| BoardError::WiFiError)?;

            log::info!("[WIFI] Access point started");
            Ok(())
        }

        /// Wait for the next station join/leave and return the new count
        pub async fn next_station_count(&mut self) -> u8 {
            let events = self
                .controller
                .wait_for_events(
                    WifiEvent::ApStaconnected | WifiEvent::ApStadisconnected,
                    true,
                )
                .await;

            let mut count = STATION_COUNT.load(Ordering::Relaxed);
            if events.contains(WifiEvent::ApStaconnected) {
                count = count.saturating_add(1);
                log::info!("[WIFI] Station joined ({} associated)", count);
            }
            if events.contains(WifiEvent::ApStadisconnected) {
                count = count.saturating_sub(1);
                log::info!("[WIFI] Station left ({} associated)", count);
            }
            STATION_COUNT.store(count, Ordering::Relaxed);
            count
        }
    }
}
