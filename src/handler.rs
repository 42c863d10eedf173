//! Command handler
//!
//! Single owner of the lamp state. Transport and WiFi tasks only post
//! [`Event`]s; the control loop feeds them here one at a time, so a command's
//! mutation, persistence and broadcast finish before the next event is seen.

use crate::config;
use crate::led_control::DutyWriter;
use crate::protocol::{self, BadRequest, Command, ErrorMessage, ModeRequest};
use crate::state_machine::{ModeParams, ModeStateMachine};
use crate::status::{ConnId, LinkTelemetry, StatusBroadcaster, Transport};
use crate::storage::{ConfigStore, StorageError};
use crate::wifi::{LinkEdge, LinkMonitor, StationMonitor};

/// Inbound message payload
pub type Payload = heapless::Vec<u8, { config::MAX_MESSAGE_LEN }>;

/// Everything that can drive the lamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// WebSocket client finished its handshake
    ClientConnected(ConnId),
    /// WebSocket client went away
    ClientDisconnected(ConnId),
    /// Text message from a client
    Message(ConnId, Payload),
    /// Associated station count changed
    StationsChanged(u8),
}

pub struct CommandHandler<D, S, L, T>
where
    D: DutyWriter,
    S: ConfigStore,
    L: LinkMonitor,
    T: Transport,
{
    machine: ModeStateMachine<D>,
    status: StatusBroadcaster,
    store: S,
    link: L,
    transport: T,
    stations: StationMonitor,
    last_broadcast_ms: u64,
}

impl<D, S, L, T> CommandHandler<D, S, L, T>
where
    D: DutyWriter,
    S: ConfigStore,
    L: LinkMonitor,
    T: Transport,
{
    /// Load the stored configuration and bring the output up in that mode
    pub fn new(output: D, mut store: S, link: L, transport: T, now_ms: u64) -> Self {
        let params = match store.load() {
            Ok(params) => {
                log::info!(
                    "[CMD] Loaded {} (hz {}, period {} ms, brightness {})",
                    params.mode.as_str(),
                    params.blink_hz,
                    params.breathe_period_ms,
                    params.brightness
                );
                params
            }
            Err(StorageError::NotFound) => {
                log::info!("[CMD] No stored configuration, using defaults");
                ModeParams::default()
            }
            Err(e) => {
                log::warn!("[CMD] Stored configuration unreadable ({:?}), using defaults", e);
                ModeParams::default()
            }
        };

        let mut stations = StationMonitor::new();
        stations.observe(link.current_station_count());

        Self {
            machine: ModeStateMachine::new(output, params, now_ms),
            status: StatusBroadcaster::new(now_ms),
            store,
            link,
            transport,
            stations,
            last_broadcast_ms: now_ms,
        }
    }

    pub fn machine(&self) -> &ModeStateMachine<D> {
        &self.machine
    }

    pub fn broadcaster(&self) -> &StatusBroadcaster {
        &self.status
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Dispatch one event
    pub fn handle_event(&mut self, event: Event, now_ms: u64) {
        match event {
            Event::ClientConnected(conn) => {
                log::info!("[CMD] Client {} connected", conn);
                self.machine.notify_connected();
                let link = self.telemetry();
                self.status
                    .send_to(conn, &self.machine, link, &mut self.transport, now_ms);
            }
            Event::ClientDisconnected(conn) => {
                log::info!("[CMD] Client {} disconnected", conn);
                if self.link.current_station_count() == 0 {
                    self.machine.enter_idle_wait();
                }
            }
            Event::Message(conn, payload) => self.handle_message(conn, &payload, now_ms),
            Event::StationsChanged(count) => match self.stations.observe(count) {
                Some(LinkEdge::Associated) => self.machine.notify_connected(),
                Some(LinkEdge::AllLeft) => self.machine.enter_idle_wait(),
                None => {}
            },
        }
    }

    /// Refresh the output and emit the periodic status
    pub fn poll(&mut self, now_ms: u64) {
        self.machine.tick(now_ms);

        if now_ms.saturating_sub(self.last_broadcast_ms) >= config::STATUS_INTERVAL_MS {
            self.last_broadcast_ms = now_ms;
            self.broadcast_status(now_ms);
        }
    }

    fn handle_message(&mut self, conn: ConnId, payload: &[u8], now_ms: u64) {
        let command = match protocol::parse_command(payload) {
            Ok(command) => command,
            Err(err) => {
                self.reject(conn, err);
                return;
            }
        };

        match command {
            Command::GetStatus => {
                let link = self.telemetry();
                self.status
                    .send_to(conn, &self.machine, link, &mut self.transport, now_ms);
            }
            Command::SetMode(request) => {
                match request {
                    ModeRequest::On => self.machine.set_on(),
                    ModeRequest::Off => self.machine.set_off(),
                    ModeRequest::Blink { hz } => self.machine.set_blink(hz),
                    ModeRequest::Breathe { period_ms } => self.machine.set_breathe(period_ms),
                }
                self.commit(now_ms);
            }
            Command::SetBrightness(duty) => {
                self.machine.set_brightness(duty);
                self.commit(now_ms);
            }
        }
    }

    /// Persist the accepted change and tell every client
    fn commit(&mut self, now_ms: u64) {
        if let Err(e) = self.store.save(&self.machine.persisted_params()) {
            log::error!("[CMD] Failed to persist configuration: {:?}", e);
        }
        self.broadcast_status(now_ms);
    }

    fn reject(&mut self, conn: ConnId, err: BadRequest) {
        log::warn!("[CMD] Rejected message from client {}: {}", conn, err.message());
        match protocol::encode(&ErrorMessage::from(err)) {
            Ok(text) => {
                if let Err(e) = self.transport.send(conn, &text) {
                    log::warn!("[CMD] Error reply to client {} failed: {}", conn, e);
                }
            }
            Err(e) => log::error!("[CMD] Error reply encode failed: {}", e),
        }
    }

    fn broadcast_status(&mut self, now_ms: u64) {
        let link = self.telemetry();
        self.status
            .broadcast(&self.machine, link, &mut self.transport, now_ms);
    }

    fn telemetry(&self) -> LinkTelemetry {
        LinkTelemetry {
            rssi: self.link.rssi(),
            wifi_clients: self.link.current_station_count(),
        }
    }
}
