//! Status broadcaster
//!
//! Serializes the lamp state for clients and counts broadcasts that found no
//! receiver. The count is reported once, as a backpressure alert, the next
//! time somebody is listening.

use crate::led_control::DutyWriter;
use crate::protocol::{self, AlertMessage, StatusMessage};
use crate::state_machine::ModeStateMachine;
use crate::BoardError;

/// Connection slot identifier
pub type ConnId = u8;

/// Outbound side of the client transport
pub trait Transport {
    /// Number of clients currently able to receive
    fn receiver_count(&self) -> usize;
    /// Send a text message to one client
    fn send(&mut self, conn: ConnId, text: &str) -> Result<(), BoardError>;
    /// Send a text message to every connected client
    fn broadcast(&mut self, text: &str) -> Result<(), BoardError>;
}

/// Telemetry that is not owned by the state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkTelemetry {
    pub rssi: i32,
    pub wifi_clients: u8,
}

pub struct StatusBroadcaster {
    dropped: u32,
    started_at_ms: u64,
}

impl StatusBroadcaster {
    pub fn new(started_at_ms: u64) -> Self {
        Self {
            dropped: 0,
            started_at_ms,
        }
    }

    /// Broadcasts that found no receiver since the last alert
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Send status to every receiver, or count it as dropped when there are none
    pub fn broadcast<D: DutyWriter, T: Transport>(
        &mut self,
        machine: &ModeStateMachine<D>,
        link: LinkTelemetry,
        transport: &mut T,
        now_ms: u64,
    ) {
        if transport.receiver_count() == 0 {
            self.dropped = self.dropped.saturating_add(1);
            log::debug!("[STATUS] no receivers, dropped {}", self.dropped);
            return;
        }

        if self.dropped > 0 {
            let dropped = self.dropped;
            self.dropped = 0;
            match protocol::encode(&AlertMessage::backpressure(dropped)) {
                Ok(text) => {
                    log::info!("[STATUS] receivers back, {} broadcasts were dropped", dropped);
                    if let Err(e) = transport.broadcast(&text) {
                        log::warn!("[STATUS] alert send failed: {}", e);
                    }
                }
                Err(e) => log::error!("[STATUS] alert encode failed: {}", e),
            }
        }

        match self.render(machine, link, transport.receiver_count(), now_ms) {
            Ok(text) => {
                if let Err(e) = transport.broadcast(&text) {
                    log::warn!("[STATUS] broadcast failed: {}", e);
                }
            }
            Err(e) => log::error!("[STATUS] status encode failed: {}", e),
        }
    }

    /// Send status to a single client
    pub fn send_to<D: DutyWriter, T: Transport>(
        &self,
        conn: ConnId,
        machine: &ModeStateMachine<D>,
        link: LinkTelemetry,
        transport: &mut T,
        now_ms: u64,
    ) {
        match self.render(machine, link, transport.receiver_count(), now_ms) {
            Ok(text) => {
                if let Err(e) = transport.send(conn, &text) {
                    log::warn!("[STATUS] send to client {} failed: {}", conn, e);
                }
            }
            Err(e) => log::error!("[STATUS] status encode failed: {}", e),
        }
    }

    fn render<D: DutyWriter>(
        &self,
        machine: &ModeStateMachine<D>,
        link: LinkTelemetry,
        receivers: usize,
        now_ms: u64,
    ) -> Result<protocol::MessageText, BoardError> {
        protocol::encode(&StatusMessage {
            evt: "status",
            uptime: now_ms.saturating_sub(self.started_at_ms) / 1000,
            rssi: link.rssi,
            mode: machine.mode().as_str(),
            hz: machine.blink_hz(),
            period_ms: machine.breathe_period_ms(),
            brightness: machine.brightness(),
            dropped: self.dropped,
            wifi_clients: link.wifi_clients,
            ws_clients: receivers.min(u8::MAX as usize) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ModeParams;

    struct NullOutput;

    impl DutyWriter for NullOutput {
        fn write_duty(&mut self, _duty: u8) {}
    }

    #[derive(Default)]
    struct Wire {
        receivers: usize,
        sent: Vec<String>,
        fail: bool,
    }

    impl Transport for Wire {
        fn receiver_count(&self) -> usize {
            self.receivers
        }

        fn send(&mut self, _conn: ConnId, text: &str) -> Result<(), BoardError> {
            self.broadcast(text)
        }

        fn broadcast(&mut self, text: &str) -> Result<(), BoardError> {
            if self.fail {
                return Err(BoardError::TransportError);
            }
            self.sent.push(text.to_string());
            Ok(())
        }
    }

    fn machine() -> ModeStateMachine<NullOutput> {
        ModeStateMachine::new(NullOutput, ModeParams::default(), 0)
    }

    #[test]
    fn counts_drops_then_alerts_once() {
        let sm = machine();
        let mut status = StatusBroadcaster::new(0);
        let mut wire = Wire::default();

        for _ in 0..3 {
            status.broadcast(&sm, LinkTelemetry::default(), &mut wire, 0);
        }
        assert_eq!(status.dropped(), 3);
        assert!(wire.sent.is_empty());

        wire.receivers = 1;
        status.broadcast(&sm, LinkTelemetry::default(), &mut wire, 0);
        assert_eq!(wire.sent.len(), 2);
        assert_eq!(
            wire.sent[0],
            r#"{"evt":"alert","type":"backpressure","dropped":3}"#
        );
        assert!(wire.sent[1].starts_with(r#"{"evt":"status""#));
        assert!(wire.sent[1].contains(r#""dropped":0"#));
        assert_eq!(status.dropped(), 0);

        status.broadcast(&sm, LinkTelemetry::default(), &mut wire, 0);
        assert_eq!(wire.sent.len(), 3);
    }

    #[test]
    fn send_failure_does_not_count_as_drop() {
        let sm = machine();
        let mut status = StatusBroadcaster::new(0);
        let mut wire = Wire {
            receivers: 2,
            fail: true,
            ..Wire::default()
        };
        status.broadcast(&sm, LinkTelemetry::default(), &mut wire, 0);
        assert_eq!(status.dropped(), 0);
    }

    #[test]
    fn status_carries_state_and_telemetry() {
        let sm = machine();
        let status = StatusBroadcaster::new(1_000);
        let mut wire = Wire {
            receivers: 1,
            ..Wire::default()
        };
        let link = LinkTelemetry {
            rssi: -40,
            wifi_clients: 2,
        };
        status.send_to(0, &sm, link, &mut wire, 6_500);
        assert_eq!(
            wire.sent[0],
            concat!(
                r#"{"evt":"status","uptime":5,"rssi":-40,"mode":"breathe","hz":2,"#,
                r#""period_ms":1500,"brightness":128,"dropped":0,"wifi_clients":2,"ws_clients":1}"#
            )
        );
    }
}
