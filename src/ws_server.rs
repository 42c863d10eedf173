//! WebSocket and control page servers
//!
//! A fixed pool of connection slots accepts WebSocket clients on port 81.
//! Slots never touch the lamp state: inbound traffic becomes [`Event`]s on
//! [`EVENTS`], outbound text arrives through a small per-slot outbox that the
//! control task fills via [`WsTransport`].

use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Duration;
use embedded_io_async::Write as _;

use crate::handler::Event;
use crate::protocol::MessageText;
use crate::status::{ConnId, Transport};
use crate::websocket::{self, FrameError, Opcode, TextAssembler};
use crate::{BoardError, config};

/// Events for the control task
pub static EVENTS: Channel<CriticalSectionRawMutex, Event, 8> = Channel::new();

type Outbox = Channel<CriticalSectionRawMutex, MessageText, 4>;

static OUTBOXES: [Outbox; config::MAX_CLIENTS] = [const { Channel::new() }; config::MAX_CLIENTS];
static CONNECTED: [AtomicBool; config::MAX_CLIENTS] =
    [const { AtomicBool::new(false) }; config::MAX_CLIENTS];

const SOCKET_BUFFER_SIZE: usize = 1024;
const FRAME_BUFFER_SIZE: usize = config::MAX_MESSAGE_LEN + 4;

/// Outbound side used by the control task; sends never block
#[derive(Debug, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn receiver_count(&self) -> usize {
        CONNECTED
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire))
            .count()
    }

    fn send(&mut self, conn: ConnId, text: &str) -> Result<(), BoardError> {
        let slot = conn as usize;
        if !CONNECTED
            .get(slot)
            .is_some_and(|c| c.load(Ordering::Acquire))
        {
            return Err(BoardError::TransportError);
        }

        let mut message = MessageText::new();
        message
            .push_str(text)
            .map_err(|_| BoardError::TransportError)?;
        OUTBOXES[slot]
            .try_send(message)
            .map_err(|_| BoardError::TransportError)
    }

    fn broadcast(&mut self, text: &str) -> Result<(), BoardError> {
        let mut result = Ok(());
        for slot in 0..config::MAX_CLIENTS {
            if CONNECTED[slot].load(Ordering::Acquire) {
                if let Err(e) = self.send(slot as ConnId, text) {
                    log::warn!("[WS] Outbox of client {} is full", slot);
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Serve one WebSocket connection slot forever
pub async fn run_ws_slot(stack: Stack<'static>, slot: ConnId) -> ! {
    let mut rx_buffer = [0u8; SOCKET_BUFFER_SIZE];
    let mut tx_buffer = [0u8; SOCKET_BUFFER_SIZE];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(30)));

        if socket.accept(config::WS_PORT).await.is_err() {
            continue;
        }
        log::info!("[WS] Slot {} accepted {:?}", slot, socket.remote_endpoint());

        if let Err(e) = serve_client(&mut socket, slot).await {
            log::warn!("[WS] Slot {} closed with error: {}", slot, e);
        }

        socket.close();
        let _ = socket.flush().await;
        socket.abort();
    }
}

async fn serve_client(socket: &mut TcpSocket<'_>, slot: ConnId) -> Result<(), BoardError> {
    let mut buf = [0u8; SOCKET_BUFFER_SIZE];
    let mut filled = 0;

    let head_end = loop {
        let n = socket
            .read(&mut buf[filled..])
            .await
            .map_err(|_| BoardError::TransportError)?;
        if n == 0 {
            return Ok(());
        }
        filled += n;
        if let Some(pos) = buf[..filled].windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if filled == buf.len() {
            return Err(BoardError::ProtocolError);
        }
    };

    let response = websocket::handshake_response(&buf[..head_end]).map_err(|e| {
        log::warn!("[WS] Slot {} handshake rejected: {:?}", slot, e);
        BoardError::ProtocolError
    })?;
    socket
        .write_all(response.as_bytes())
        .await
        .map_err(|_| BoardError::TransportError)?;

    // Frames may have arrived right behind the handshake
    buf.copy_within(head_end..filled, 0);
    filled -= head_end;

    let outbox = &OUTBOXES[slot as usize];
    while outbox.try_receive().is_ok() {}

    CONNECTED[slot as usize].store(true, Ordering::Release);
    EVENTS.send(Event::ClientConnected(slot)).await;

    let result = pump_frames(socket, slot, outbox, &mut buf, filled).await;

    CONNECTED[slot as usize].store(false, Ordering::Release);
    EVENTS.send(Event::ClientDisconnected(slot)).await;
    result
}

async fn pump_frames(
    socket: &mut TcpSocket<'_>,
    slot: ConnId,
    outbox: &Outbox,
    buf: &mut [u8],
    mut filled: usize,
) -> Result<(), BoardError> {
    let mut out = [0u8; FRAME_BUFFER_SIZE];
    let mut assembler = TextAssembler::<{ config::MAX_MESSAGE_LEN }>::new();

    loop {
        loop {
            let frame = match websocket::decode_frame(&mut buf[..filled], config::MAX_MESSAGE_LEN) {
                Ok(frame) => frame,
                Err(FrameError::Incomplete) => break,
                Err(e) => {
                    log::warn!("[WS] Slot {} bad frame: {:?}", slot, e);
                    let len = websocket::encode_frame(Opcode::Close, &1002u16.to_be_bytes(), &mut out)
                        .map_err(|_| BoardError::ProtocolError)?;
                    let _ = socket.write_all(&out[..len]).await;
                    return Err(BoardError::ProtocolError);
                }
            };

            match frame.opcode {
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    match assembler.push(frame.opcode, frame.fin, &buf[frame.payload.clone()]) {
                        Ok(Some(payload)) => EVENTS.send(Event::Message(slot, payload)).await,
                        Ok(None) => {}
                        Err(e) => {
                            log::warn!("[WS] Slot {} message dropped: {:?}", slot, e);
                            let len = websocket::encode_frame(Opcode::Close, &1009u16.to_be_bytes(), &mut out)
                                .map_err(|_| BoardError::ProtocolError)?;
                            let _ = socket.write_all(&out[..len]).await;
                            return Err(BoardError::ProtocolError);
                        }
                    }
                }
                Opcode::Ping => {
                    let len = websocket::encode_frame(Opcode::Pong, &buf[frame.payload.clone()], &mut out)
                        .map_err(|_| BoardError::ProtocolError)?;
                    socket
                        .write_all(&out[..len])
                        .await
                        .map_err(|_| BoardError::TransportError)?;
                }
                Opcode::Close => {
                    let len = websocket::encode_frame(Opcode::Close, &[], &mut out)
                        .map_err(|_| BoardError::ProtocolError)?;
                    let _ = socket.write_all(&out[..len]).await;
                    log::info!("[WS] Slot {} closed by client", slot);
                    return Ok(());
                }
                Opcode::Pong => {}
            }

            buf.copy_within(frame.consumed..filled, 0);
            filled -= frame.consumed;
        }

        if filled == buf.len() {
            return Err(BoardError::ProtocolError);
        }

        match select(socket.read(&mut buf[filled..]), outbox.receive()).await {
            Either::First(Ok(0)) => return Ok(()),
            Either::First(Ok(n)) => filled += n,
            Either::First(Err(_)) => return Err(BoardError::TransportError),
            Either::Second(text) => {
                let len = websocket::encode_frame(Opcode::Text, text.as_bytes(), &mut out)
                    .map_err(|_| BoardError::ProtocolError)?;
                socket
                    .write_all(&out[..len])
                    .await
                    .map_err(|_| BoardError::TransportError)?;
            }
        }
    }
}

/// Serve the control page on port 80 forever
pub async fn run_http_page(stack: Stack<'static>) -> ! {
    let mut rx_buffer = [0u8; SOCKET_BUFFER_SIZE];
    let mut tx_buffer = [0u8; 2048];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(10)));

        if socket.accept(config::HTTP_PORT).await.is_err() {
            continue;
        }

        if let Err(e) = serve_page(&mut socket).await {
            log::warn!("[HTTP] Request failed: {}", e);
        }

        socket.close();
        let _ = socket.flush().await;
        socket.abort();
    }
}

async fn serve_page(socket: &mut TcpSocket<'_>) -> Result<(), BoardError> {
    let mut head = [0u8; 512];
    let mut filled = 0;
    loop {
        let n = socket
            .read(&mut head[filled..])
            .await
            .map_err(|_| BoardError::TransportError)?;
        if n == 0 {
            return Ok(());
        }
        filled += n;
        if head[..filled].windows(4).any(|w| w == b"\r\n\r\n") || filled == head.len() {
            break;
        }
    }

    let found = head[..filled].starts_with(b"GET / ") || head[..filled].starts_with(b"GET /index.html ");
    let (status, body) = if found {
        ("200 OK", INDEX_HTML)
    } else {
        ("404 Not Found", "not found")
    };
    log::info!("[HTTP] {}", status);

    let mut header = heapless::String::<160>::new();
    write!(
        header,
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    )
    .map_err(|_| BoardError::SystemError)?;

    socket
        .write_all(header.as_bytes())
        .await
        .map_err(|_| BoardError::TransportError)?;
    socket
        .write_all(body.as_bytes())
        .await
        .map_err(|_| BoardError::TransportError)?;
    Ok(())
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>ESP32 Lamp</title>
</head>
<body>
<h3>ESP32 WebSocket LED</h3>
<p>
<button onclick="send({cmd:'set_mode',mode:'on'})">ON</button>
<button onclick="send({cmd:'set_mode',mode:'off'})">OFF</button>
<button onclick="send({cmd:'set_mode',mode:'blink',hz:2})">Blink 2Hz</button>
<button onclick="send({cmd:'set_mode',mode:'breathe',period_ms:1500})">Breathe</button>
</p>
<p>Brightness <input id="duty" type="range" min="0" max="255" value="128"
 onchange="send({cmd:'set_brightness',duty:parseInt(this.value)})"></p>
<pre id="status">connecting...</pre>
<script>
var ws;
function connect(){
  ws = new WebSocket('ws://' + location.hostname + ':81/');
  ws.onopen = function(){ send({cmd:'get_status'}); };
  ws.onmessage = function(evt){
    var msg = JSON.parse(evt.data);
    if (msg.evt === 'status') document.getElementById('duty').value = msg.brightness;
    document.getElementById('status').textContent = JSON.stringify(msg, null, 1);
  };
  ws.onclose = function(){ setTimeout(connect, 1000); };
}
function send(obj){ if (ws && ws.readyState === 1) ws.send(JSON.stringify(obj)); }
connect();
</script>
</body>
</html>
"#;
