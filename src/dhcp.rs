//! DHCP server for access point clients
//!
//! Addresses come from 192.168.4.2..=192.168.4.50. A new MAC starts at a slot
//! hashed from its last byte and probes forward past slots already bound, so
//! the few stations the AP admits never share an address.

use core::net::Ipv4Addr;

use crate::config;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const OPTIONS_OFFSET: usize = 240;
const LEASE_SECS: u32 = 3600;

const POOL_START: u8 = 2;
const POOL_SIZE: u8 = 49;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_END: u8 = 255;

/// DHCP message types the server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Ack,
}

impl MessageType {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageType::Discover),
            2 => Some(MessageType::Offer),
            3 => Some(MessageType::Request),
            5 => Some(MessageType::Ack),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            MessageType::Discover => 1,
            MessageType::Offer => 2,
            MessageType::Request => 3,
            MessageType::Ack => 5,
        }
    }

    /// Reply for a client message, if the server answers it
    pub fn reply(self) -> Option<Self> {
        match self {
            MessageType::Discover => Some(MessageType::Offer),
            MessageType::Request => Some(MessageType::Ack),
            MessageType::Offer | MessageType::Ack => None,
        }
    }
}

/// Fields of a client message needed to answer it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMessage {
    pub xid: [u8; 4],
    pub mac: [u8; 6],
    pub kind: MessageType,
}

/// Parse a BOOTREQUEST; anything else yields `None`
pub fn parse_client_message(packet: &[u8]) -> Option<ClientMessage> {
    if packet.len() < OPTIONS_OFFSET || packet[0] != BOOTREQUEST {
        return None;
    }
    if packet[236..OPTIONS_OFFSET] != MAGIC_COOKIE {
        return None;
    }

    let kind = find_option(&packet[OPTIONS_OFFSET..], OPT_MESSAGE_TYPE)
        .and_then(|data| data.first().copied())
        .and_then(MessageType::from_code)?;

    let mut xid = [0u8; 4];
    xid.copy_from_slice(&packet[4..8]);
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&packet[28..34]);

    Some(ClientMessage { xid, mac, kind })
}

/// MAC to host-octet bindings, one per admitted station
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: heapless::Vec<([u8; 6], u8), { config::MAX_CLIENTS }>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address for `mac`; stable for a known MAC, first free slot for a new one
    pub fn lease_for(&mut self, mac: &[u8; 6]) -> Ipv4Addr {
        let host = match self.leases.iter().find(|(known, _)| known == mac) {
            Some(&(_, host)) => host,
            None => {
                if self.leases.is_full() {
                    // Oldest binding goes first
                    self.leases.remove(0);
                }
                let mut offset = mac[5] % POOL_SIZE;
                while self
                    .leases
                    .iter()
                    .any(|&(_, host)| host == POOL_START + offset)
                {
                    offset = (offset + 1) % POOL_SIZE;
                }
                let host = POOL_START + offset;
                let _ = self.leases.push((*mac, host));
                host
            }
        };

        let [a, b, c, _] = config::AP_IP;
        Ipv4Addr::new(a, b, c, host)
    }
}

/// Build an OFFER/ACK for `offered` into `out`; returns the packet length
pub fn build_reply(
    server: Ipv4Addr,
    client: &ClientMessage,
    kind: MessageType,
    offered: Ipv4Addr,
    out: &mut [u8],
) -> usize {
    out.fill(0);

    out[0] = BOOTREPLY;
    out[1] = 1; // ethernet
    out[2] = 6; // MAC length
    out[4..8].copy_from_slice(&client.xid);
    out[10] = 0x80; // broadcast flag
    out[16..20].copy_from_slice(&offered.octets());
    out[20..24].copy_from_slice(&server.octets());
    out[28..34].copy_from_slice(&client.mac);
    out[236..OPTIONS_OFFSET].copy_from_slice(&MAGIC_COOKIE);

    let mut writer = OptionWriter {
        buf: out,
        pos: OPTIONS_OFFSET,
    };
    writer.put(OPT_MESSAGE_TYPE, &[kind.code()]);
    writer.put(OPT_SERVER_ID, &server.octets());
    writer.put(OPT_LEASE_TIME, &LEASE_SECS.to_be_bytes());
    writer.put(OPT_SUBNET_MASK, &[255, 255, 255, 0]);
    writer.put(OPT_ROUTER, &server.octets());
    writer.put(OPT_DNS, &server.octets());
    writer.end()
}

struct OptionWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl OptionWriter<'_> {
    fn put(&mut self, code: u8, data: &[u8]) {
        self.buf[self.pos] = code;
        self.buf[self.pos + 1] = data.len() as u8;
        self.buf[self.pos + 2..self.pos + 2 + data.len()].copy_from_slice(data);
        self.pos += 2 + data.len();
    }

    fn end(self) -> usize {
        self.buf[self.pos] = OPT_END;
        self.pos + 1
    }
}

fn find_option(mut options: &[u8], wanted: u8) -> Option<&[u8]> {
    loop {
        match options {
            [] | [OPT_END, ..] => return None,
            [OPT_PAD, rest @ ..] => options = rest,
            [code, len, rest @ ..] => {
                let len = *len as usize;
                let data = rest.get(..len)?;
                if *code == wanted {
                    return Some(data);
                }
                options = &rest[len..];
            }
            [_] => return None,
        }
    }
}

#[cfg(feature = "device")]
pub use server::run_dhcp_server;

#[cfg(feature = "device")]
mod server {
    use super::{CLIENT_PORT, LeaseTable, SERVER_PORT, build_reply, parse_client_message};
    use core::net::Ipv4Addr;
    use embassy_net::Stack;
    use embassy_net::udp::{PacketMetadata, UdpSocket};

    /// Answer DISCOVER/REQUEST broadcasts forever
    pub async fn run_dhcp_server(stack: Stack<'static>, server: Ipv4Addr) {
        let mut rx_meta = [PacketMetadata::EMPTY; 8];
        let mut rx_buffer = [0u8; 1024];
        let mut tx_meta = [PacketMetadata::EMPTY; 8];
        let mut tx_buffer = [0u8; 1024];
        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );

        if let Err(e) = socket.bind(SERVER_PORT) {
            log::error!("[DHCP] Failed to bind port {}: {:?}", SERVER_PORT, e);
            return;
        }
        log::info!("[DHCP] Serving leases on port {}", SERVER_PORT);

        let mut leases = LeaseTable::new();
        let mut packet = [0u8; 576];
        loop {
            let len = match socket.recv_from(&mut packet).await {
                Ok((len, _)) => len,
                Err(e) => {
                    log::warn!("[DHCP] Receive error: {:?}", e);
                    continue;
                }
            };

            let Some(client) = parse_client_message(&packet[..len]) else {
                continue;
            };
            let Some(reply) = client.kind.reply() else {
                continue;
            };

            let offered = leases.lease_for(&client.mac);
            let reply_len = build_reply(server, &client, reply, offered, &mut packet);
            if let Err(e) = socket
                .send_to(&packet[..reply_len], (Ipv4Addr::BROADCAST, CLIENT_PORT))
                .await
            {
                log::warn!("[DHCP] Send error: {:?}", e);
            } else {
                log::debug!("[DHCP] {:?} sent to {:02x?}", reply, client.mac);
            }
        }
    }
}
