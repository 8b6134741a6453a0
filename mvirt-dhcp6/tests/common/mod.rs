//! Test helpers for mvirt-dhcp6 integration tests.
//!
//! The state machine is driven directly: a recording transport stands in
//! for the sockets and a recording runner for the configuration script.

#![allow(dead_code)]

use std::net::Ipv6Addr;
use std::time::Duration;

use mvirt_dhcp6::client::{Client, ClientSignal, ClientState};
use mvirt_dhcp6::config::Config;
use mvirt_dhcp6::context::ClientContext;
use mvirt_dhcp6::dhcp6::codec::OptionBuf;
use mvirt_dhcp6::dhcp6::options::{MessageType, code};
use mvirt_dhcp6::error::NetworkError;
use mvirt_dhcp6::network::{Interface, ListenMode, Received, Transport};
use mvirt_dhcp6::script::{ScriptEvent, ScriptRunner};

pub const SERVER: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x547);
pub const LEASED: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x42);
pub const SERVER_DUID: &[u8] = &[0, 3, 0, 1, 0x52, 0x54, 0, 0xaa, 0xbb, 0xcc];

pub fn test_interface() -> Interface {
    Interface {
        name: "eth0".to_string(),
        index: 2,
        mac: [0x52, 0x54, 0x00, 0x12, 0x34, 0x56],
        link_local: "fe80::5054:ff:fe12:3456".parse().unwrap(),
    }
}

/// A packet handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Multicast(Vec<u8>),
    Unicast {
        src: Option<Ipv6Addr>,
        dst: Ipv6Addr,
        data: Vec<u8>,
    },
}

impl Sent {
    pub fn data(&self) -> &[u8] {
        match self {
            Sent::Multicast(data) => data,
            Sent::Unicast { data, .. } => data,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.data()[0])
    }

    pub fn is_multicast(&self) -> bool {
        matches!(self, Sent::Multicast(_))
    }
}

/// Records sends and listen-mode changes. `iface = None` simulates a
/// removed interface.
#[derive(Debug)]
pub struct MockTransport {
    pub mode: ListenMode,
    pub modes: Vec<ListenMode>,
    pub sent: Vec<Sent>,
    pub iface: Option<Interface>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            mode: ListenMode::None,
            modes: Vec::new(),
            sent: Vec::new(),
            iface: Some(test_interface()),
        }
    }

    pub fn last_sent(&self) -> &Sent {
        self.sent.last().expect("nothing sent")
    }
}

impl Transport for MockTransport {
    fn change_listen_mode(&mut self, mode: ListenMode, _iface: &Interface) -> Result<(), NetworkError> {
        self.mode = mode;
        self.modes.push(mode);
        Ok(())
    }

    fn listen_mode(&self) -> ListenMode {
        self.mode
    }

    fn send_multicast(&mut self, _iface: &Interface, payload: &[u8]) -> Result<(), NetworkError> {
        self.sent.push(Sent::Multicast(payload.to_vec()));
        Ok(())
    }

    fn send_unicast(
        &mut self,
        _iface: &Interface,
        src: Option<Ipv6Addr>,
        dst: Ipv6Addr,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        self.sent.push(Sent::Unicast {
            src,
            dst,
            data: payload.to_vec(),
        });
        Ok(())
    }

    fn refresh_interface(&mut self, name: &str) -> Result<Interface, NetworkError> {
        self.iface
            .clone()
            .ok_or_else(|| NetworkError::NoInterface(name.to_string()))
    }
}

/// Records every script run.
#[derive(Debug, Default)]
pub struct RecordingScripts {
    pub runs: Vec<(ScriptEvent, Vec<String>)>,
}

impl RecordingScripts {
    pub fn events(&self) -> Vec<ScriptEvent> {
        self.runs.iter().map(|(e, _)| *e).collect()
    }

    pub fn last(&self) -> &(ScriptEvent, Vec<String>) {
        self.runs.last().expect("no script run")
    }
}

impl ScriptRunner for RecordingScripts {
    fn run(&mut self, event: ScriptEvent, env: &[String]) {
        self.runs.push((event, env.to_vec()));
    }
}

pub type TestClient = Client<MockTransport, RecordingScripts>;

/// A started client: "deconfig" has run and the first timeout is armed.
pub fn new_client(config: Config) -> TestClient {
    let ctx = ClientContext::new(config, test_interface());
    let mut client = Client::new(ctx, MockTransport::new(), RecordingScripts::default());
    client.start();
    client
}

/// Server message: header followed by `options` in order.
pub fn server_message(msg_type: MessageType, xid: u32, options: &[OptionBuf]) -> Vec<u8> {
    let mut msg = vec![msg_type as u8];
    msg.extend_from_slice(&xid.to_be_bytes()[1..]);
    for opt in options {
        msg.extend_from_slice(opt.as_bytes());
    }
    msg
}

pub fn received(data: Vec<u8>) -> Received {
    Received { data, peer: SERVER }
}

pub fn server_id() -> OptionBuf {
    OptionBuf::new(code::SERVER_ID, SERVER_DUID)
}

pub fn status(status_code: u16, text: &str) -> OptionBuf {
    let mut data = status_code.to_be_bytes().to_vec();
    data.extend_from_slice(text.as_bytes());
    OptionBuf::new(code::STATUS_CODE, &data)
}

/// IA_NA holding one IAADDR.
pub fn ia_na(addr: Ipv6Addr, lease: u32) -> OptionBuf {
    let mut iaaddr = addr.octets().to_vec();
    iaaddr.extend_from_slice(&lease.to_be_bytes());
    iaaddr.extend_from_slice(&lease.to_be_bytes());
    let mut data = vec![0x00, 0x12, 0x34, 0x56, 0, 0, 0, 0, 0, 0, 0, 0];
    data.extend_from_slice(OptionBuf::new(code::IAADDR, &iaaddr).as_bytes());
    OptionBuf::new(code::IA_NA, &data)
}

/// IA_PD holding one IAPREFIX.
pub fn ia_pd(prefix: Ipv6Addr, len: u8, lease: u32) -> OptionBuf {
    let mut iaprefix = lease.to_be_bytes().to_vec();
    iaprefix.extend_from_slice(&lease.to_be_bytes());
    iaprefix.push(len);
    iaprefix.extend_from_slice(&prefix.octets());
    let mut data = vec![0x00, 0x12, 0x34, 0x56, 0, 0, 0, 0, 0, 0, 0, 0];
    data.extend_from_slice(OptionBuf::new(code::IAPREFIX, &iaprefix).as_bytes());
    OptionBuf::new(code::IA_PD, &data)
}

/// Deliver a server message carrying the client's current xid.
pub fn deliver(client: &mut TestClient, msg_type: MessageType, options: &[OptionBuf]) {
    let xid = client.context().xid;
    client
        .on_packet(&received(server_message(msg_type, xid, options)))
        .unwrap();
}

/// Solicit, Advertise, Request, Reply with an address lease of `lease`.
pub fn bind(client: &mut TestClient, lease: u32) {
    client.on_timeout().unwrap();
    deliver(client, MessageType::Advertise, &[server_id()]);
    assert_eq!(client.state(), ClientState::Requesting);
    client.on_timeout().unwrap();
    deliver(client, MessageType::Reply, &[server_id(), ia_na(LEASED, lease)]);
    assert_eq!(client.state(), ClientState::Bound);
}

/// Let the armed timeout run out.
pub fn expire(client: &mut TestClient) {
    let timeout = client.timeout().expect("no timeout armed");
    client.elapse(timeout);
}

/// A client with a 3600 s lease, brought into `state`.
pub fn client_in(state: ClientState) -> TestClient {
    let mut client = new_client(Config::default());
    match state {
        ClientState::InitSelecting => {
            client.on_timeout().unwrap();
        }
        ClientState::Requesting => {
            client.on_timeout().unwrap();
            deliver(&mut client, MessageType::Advertise, &[server_id()]);
        }
        ClientState::Bound => bind(&mut client, 3600),
        ClientState::Renewing => {
            bind(&mut client, 3600);
            expire(&mut client);
            client.on_timeout().unwrap();
        }
        ClientState::RenewRequested => {
            bind(&mut client, 3600);
            client.on_signal(ClientSignal::Renew).unwrap();
        }
        ClientState::Rebinding => {
            bind(&mut client, 3600);
            let remaining = client.lease_remaining();
            client.elapse(remaining - Duration::from_secs(13));
            client.on_timeout().unwrap();
            expire(&mut client);
            client.on_timeout().unwrap();
        }
        ClientState::Released => {
            bind(&mut client, 3600);
            client.on_signal(ClientSignal::Release).unwrap();
        }
    }
    assert_eq!(client.state(), state);
    client
}
