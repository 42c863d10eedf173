//! End-to-end command handling against in-memory collaborators

use std::cell::Cell;
use std::rc::Rc;

use lamp_board_rs::BoardError;
use lamp_board_rs::handler::{CommandHandler, Event, Payload};
use lamp_board_rs::led_control::DutyWriter;
use lamp_board_rs::state_machine::{Mode, ModeParams};
use lamp_board_rs::status::{ConnId, Transport};
use lamp_board_rs::storage::{ConfigStore, StorageError, decode_record, encode_record};
use lamp_board_rs::wifi::LinkMonitor;

#[derive(Default)]
struct Led {
    writes: Vec<u8>,
}

impl DutyWriter for Led {
    fn write_duty(&mut self, duty: u8) {
        self.writes.push(duty);
    }
}

/// Flash stand-in that keeps the encoded record
#[derive(Default)]
struct Flash {
    record: Option<Vec<u8>>,
    saves: usize,
    fail_saves: bool,
}

impl Flash {
    fn holding(params: ModeParams) -> Self {
        Self {
            record: Some(encode_record(&params).unwrap().to_vec()),
            ..Self::default()
        }
    }

    fn stored(&self) -> Option<ModeParams> {
        self.record.as_deref().and_then(|r| decode_record(r).ok())
    }
}

impl ConfigStore for Flash {
    fn load(&mut self) -> Result<ModeParams, StorageError> {
        match &self.record {
            Some(record) => decode_record(record),
            None => Err(StorageError::NotFound),
        }
    }

    fn save(&mut self, params: &ModeParams) -> Result<(), StorageError> {
        if self.fail_saves {
            return Err(StorageError::Driver);
        }
        self.saves += 1;
        self.record = Some(encode_record(params)?.to_vec());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Stations(Rc<Cell<u8>>);

impl LinkMonitor for Stations {
    fn current_station_count(&self) -> u8 {
        self.0.get()
    }
}

#[derive(Default)]
struct Clients {
    connected: Vec<ConnId>,
    unicast: Vec<(ConnId, String)>,
    broadcast: Vec<String>,
}

impl Transport for Clients {
    fn receiver_count(&self) -> usize {
        self.connected.len()
    }

    fn send(&mut self, conn: ConnId, text: &str) -> Result<(), BoardError> {
        if !self.connected.contains(&conn) {
            return Err(BoardError::TransportError);
        }
        self.unicast.push((conn, text.to_string()));
        Ok(())
    }

    fn broadcast(&mut self, text: &str) -> Result<(), BoardError> {
        self.broadcast.push(text.to_string());
        Ok(())
    }
}

type Handler = CommandHandler<Led, Flash, Stations, Clients>;

fn handler_with(flash: Flash) -> (Handler, Stations) {
    let stations = Stations::default();
    let handler = CommandHandler::new(
        Led::default(),
        flash,
        stations.clone(),
        Clients::default(),
        0,
    );
    (handler, stations)
}

fn message(conn: ConnId, text: &str) -> Event {
    Event::Message(conn, Payload::from_slice(text.as_bytes()).unwrap())
}

fn connect(handler: &mut Handler, stations: &Stations, conn: ConnId) {
    stations.0.set(stations.0.get() + 1);
    handler.transport_mut().connected.push(conn);
    handler.handle_event(Event::ClientConnected(conn), 0);
}

#[test]
fn empty_storage_starts_breathing_with_defaults() {
    let (handler, _) = handler_with(Flash::default());
    assert_eq!(handler.machine().params(), ModeParams::default());
    assert_eq!(handler.machine().output().writes, vec![0]);
}

#[test]
fn stored_blink_drives_166ms_half_cycles() {
    // Record as written by an older firmware without period_ms
    let json = br#"{"mode":"blink","hz":3,"brightness":200}"#;
    let mut record = vec![0x41, 0x4C];
    record.extend_from_slice(&(json.len() as u16).to_le_bytes());
    record.extend_from_slice(json);
    let (mut handler, _) = handler_with(Flash {
        record: Some(record),
        ..Flash::default()
    });
    assert_eq!(handler.machine().mode(), Mode::Blink);

    let mut duties = Vec::new();
    for now in (0..=664).step_by(166) {
        handler.poll(now);
        duties.push(*handler.machine().output().writes.last().unwrap());
    }
    assert_eq!(duties, vec![0, 200, 0, 200, 0]);
}

#[test]
fn connect_sends_status_to_the_new_client_only() {
    let (mut handler, stations) = handler_with(Flash::default());
    connect(&mut handler, &stations, 2);

    let clients = handler.transport();
    assert_eq!(clients.unicast.len(), 1);
    assert_eq!(clients.unicast[0].0, 2);
    assert!(clients.unicast[0].1.contains(r#""evt":"status""#));
    assert!(clients.unicast[0].1.contains(r#""ws_clients":1"#));
    assert!(clients.broadcast.is_empty());
}

#[test]
fn accepted_command_mutates_persists_then_broadcasts() {
    let (mut handler, stations) = handler_with(Flash::default());
    connect(&mut handler, &stations, 0);

    handler.handle_event(message(0, r#"{"cmd":"set_mode","mode":"blink","hz":0}"#), 10);

    assert_eq!(handler.machine().mode(), Mode::Blink);
    assert_eq!(handler.machine().blink_hz(), 1);
    assert_eq!(handler.store().stored().map(|p| p.blink_hz), Some(1));
    let last = handler.transport().broadcast.last().unwrap();
    assert!(last.contains(r#""mode":"blink","hz":1"#));
}

#[test]
fn oversized_brightness_is_clamped_and_persisted() {
    let (mut handler, stations) = handler_with(Flash::default());
    connect(&mut handler, &stations, 0);
    handler.handle_event(message(0, r#"{"cmd":"set_mode","mode":"on"}"#), 0);

    handler.handle_event(message(0, r#"{"cmd":"set_brightness","duty":999}"#), 0);

    assert_eq!(handler.machine().brightness(), 255);
    assert_eq!(handler.machine().output().writes.last(), Some(&255));
    assert_eq!(handler.store().stored().map(|p| p.brightness), Some(255));
}

#[test]
fn rejected_command_is_answered_to_sender_without_side_effects() {
    let (mut handler, stations) = handler_with(Flash::default());
    connect(&mut handler, &stations, 0);
    connect(&mut handler, &stations, 1);
    let before = handler.machine().params();

    handler.handle_event(message(1, r#"{"cmd":"set_mode","mode":"on","hz":5}"#), 0);

    assert_eq!(handler.machine().params(), before);
    assert_eq!(handler.store().saves, 0);
    assert!(handler.transport().broadcast.is_empty());
    let (conn, text) = handler.transport().unicast.last().unwrap();
    assert_eq!(*conn, 1);
    assert_eq!(
        text,
        r#"{"evt":"error","code":"bad_request","msg":"unknown field hz"}"#
    );
}

#[test]
fn get_status_is_unicast_and_not_persisted() {
    let (mut handler, stations) = handler_with(Flash::default());
    connect(&mut handler, &stations, 3);
    let unicast_before = handler.transport().unicast.len();

    handler.handle_event(message(3, r#"{"cmd":"get_status"}"#), 0);

    assert_eq!(handler.transport().unicast.len(), unicast_before + 1);
    assert!(handler.transport().broadcast.is_empty());
    assert_eq!(handler.store().saves, 0);
}

#[test]
fn storage_failure_keeps_the_change() {
    let (mut handler, stations) = handler_with(Flash {
        fail_saves: true,
        ..Flash::default()
    });
    connect(&mut handler, &stations, 0);

    handler.handle_event(message(0, r#"{"cmd":"set_mode","mode":"off"}"#), 0);

    assert_eq!(handler.machine().mode(), Mode::Off);
    assert_eq!(handler.transport().broadcast.len(), 1);
}

#[test]
fn last_client_leaving_enters_idle_wait_and_reconnect_restores() {
    let stored = ModeParams {
        mode: Mode::On,
        blink_hz: 4,
        breathe_period_ms: 1200,
        brightness: 60,
    };
    let (mut handler, stations) = handler_with(Flash::holding(stored));
    connect(&mut handler, &stations, 0);

    // Another station still associated: stay as is
    stations.0.set(1);
    handler.handle_event(Event::ClientDisconnected(0), 0);
    assert_eq!(handler.machine().mode(), Mode::On);

    stations.0.set(0);
    handler.handle_event(Event::ClientDisconnected(0), 0);
    assert_eq!(handler.machine().mode(), Mode::IdleWait);
    assert_eq!(handler.machine().brightness(), 255);
    assert_eq!(handler.machine().breathe_period_ms(), 800);

    handler.transport_mut().connected.clear();
    connect(&mut handler, &stations, 1);
    assert_eq!(handler.machine().params(), stored);
}

#[test]
fn station_edges_drive_idle_wait() {
    let (mut handler, _) = handler_with(Flash::default());

    handler.handle_event(Event::StationsChanged(1), 0);
    assert_eq!(handler.machine().mode(), Mode::Breathe);

    handler.handle_event(Event::StationsChanged(0), 0);
    assert_eq!(handler.machine().mode(), Mode::IdleWait);
    handler.handle_event(Event::StationsChanged(0), 0);
    assert_eq!(
        handler.machine().saved_before_wait(),
        Some(ModeParams::default())
    );

    handler.handle_event(Event::StationsChanged(2), 0);
    assert_eq!(handler.machine().params(), ModeParams::default());
}

#[test]
fn periodic_broadcasts_without_clients_are_reported_on_return() {
    let (mut handler, stations) = handler_with(Flash::default());

    for now in [2000, 4000, 6000] {
        handler.poll(now);
    }
    assert_eq!(handler.broadcaster().dropped(), 3);

    connect(&mut handler, &stations, 0);
    handler.poll(8000);

    let sent = &handler.transport().broadcast;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], r#"{"evt":"alert","type":"backpressure","dropped":3}"#);
    assert!(sent[1].contains(r#""uptime":8"#));
    assert_eq!(handler.broadcaster().dropped(), 0);
}

#[test]
fn commands_during_idle_wait_persist_the_user_setting() {
    let (mut handler, _) = handler_with(Flash::default());
    handler.handle_event(Event::StationsChanged(1), 0);
    handler.handle_event(Event::StationsChanged(0), 0);
    assert_eq!(handler.machine().mode(), Mode::IdleWait);

    // A straggling socket can still deliver a message
    handler.handle_event(message(0, r#"{"cmd":"set_brightness","duty":20}"#), 0);

    let stored = handler.store().stored().unwrap();
    assert_eq!(stored.mode, Mode::Breathe);
    assert_eq!(stored.brightness, 20);
    assert_eq!(stored.breathe_period_ms, 1500);
}

#[test]
fn station_count_burst_still_reaches_idle_wait() {
    let (mut handler, _) = handler_with(Flash::default());

    for count in [1, 2, 3, 2, 1, 0] {
        handler.handle_event(Event::StationsChanged(count), 0);
    }
    assert_eq!(handler.machine().mode(), Mode::IdleWait);

    for count in [1, 2] {
        handler.handle_event(Event::StationsChanged(count), 0);
    }
    assert_eq!(handler.machine().mode(), Mode::Breathe);
}
