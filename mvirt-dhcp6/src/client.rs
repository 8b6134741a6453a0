//! DHCPv6 lease state machine.
//!
//! The machine is driven by three kinds of events, each handled to
//! completion: the armed timeout expiring, a signal, or a packet arriving.
//! After every event the caller reads [`Client::timeout`] to know how long
//! to wait for the next one.

use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::context::ClientContext;
use crate::dhcp6::codec::{
    IA_HEADER_LEN, IAADDR_LEN, IAPREFIX_LEN, OptionBuf, copy_option, find_option,
};
use crate::dhcp6::options::{MessageType, code};
use crate::dhcp6::packet::{
    Message, build_info_request, build_release, build_renew, build_request, build_solicit,
};
use crate::error::Result;
use crate::network::{ListenMode, Received, Transport};
use crate::script::{ScriptEvent, ScriptRunner, build_env};

/// Lower bound for a granted lease, and the point below which a failed
/// renew moves on to rebinding.
pub const MIN_LEASE: Duration = Duration::from_secs(30);

/// Pause after a server reports a failure status.
pub const NAK_PAUSE: Duration = Duration::from_secs(3);

/// Lease assumed for Information-Request replies.
pub const STATELESS_LEASE: Duration = Duration::from_secs(24 * 60 * 60);

/// Multicast Renew attempts while rebinding.
const REBIND_ATTEMPTS: u32 = 3;

/// Longest lease we keep track of.
const MAX_LEASE_SECS: u32 = i32::MAX as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// (Re)starting negotiation: Solicit sent, waiting for Advertise.
    InitSelecting,
    /// Advertise received, Request sent.
    Requesting,
    /// Lease held, waiting for half of it to pass.
    Bound,
    /// Renewing with the server that granted the lease.
    Renewing,
    /// Renew unanswered and the lease is nearly over: multicast Renew.
    Rebinding,
    /// Renew requested by signal.
    RenewRequested,
    /// Lease released by signal; idle until told to renew.
    Released,
}

/// Signals the client reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignal {
    /// SIGUSR1
    Renew,
    /// SIGUSR2
    Release,
    /// SIGTERM
    Terminate,
}

/// What the event loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Leave the loop normally (exit status 0), releasing first if configured.
    Stop,
    /// Leave the loop with exit status 1.
    Fail,
}

/// A validated lease grant, not yet applied.
struct Grant {
    ia_na: Option<OptionBuf>,
    ia_pd: Option<OptionBuf>,
    address: Option<Ipv6Addr>,
    address_lease: u32,
    prefix_lease: u32,
}

pub struct Client<T: Transport, S: ScriptRunner> {
    ctx: ClientContext,
    transport: T,
    scripts: S,
    state: ClientState,
    /// Packets sent in the current state.
    packet_num: u32,
    /// Time until the next timeout event; `None` waits forever.
    timeout: Option<Duration>,
    lease_remaining: Duration,
    exit_if_no_lease: bool,
}

impl<T: Transport, S: ScriptRunner> Client<T, S> {
    pub fn new(ctx: ClientContext, transport: T, scripts: S) -> Self {
        let exit_if_no_lease = ctx.config.exit_if_no_lease;
        Self {
            ctx,
            transport,
            scripts,
            state: ClientState::InitSelecting,
            packet_num: 0,
            timeout: Some(Duration::ZERO),
            lease_remaining: Duration::ZERO,
            exit_if_no_lease,
        }
    }

    /// Deconfigure the interface and arm an immediate timeout.
    pub fn start(&mut self) {
        self.state = ClientState::InitSelecting;
        self.run_script(ScriptEvent::Deconfig, None);
        self.packet_num = 0;
        self.timeout = Some(Duration::ZERO);
        self.lease_remaining = Duration::ZERO;
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn lease_remaining(&self) -> Duration {
        self.lease_remaining
    }

    pub fn packet_num(&self) -> u32 {
        self.packet_num
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scripts(&self) -> &S {
        &self.scripts
    }

    /// Account for time spent waiting.
    pub fn elapse(&mut self, waited: Duration) {
        self.lease_remaining = self.lease_remaining.saturating_sub(waited);
        if let Some(t) = self.timeout.as_mut() {
            *t = t.saturating_sub(waited);
        }
    }

    /// The armed timeout has run out.
    pub fn on_timeout(&mut self) -> Result<Flow> {
        // The interface may have been replaced or re-indexed (bridges do this).
        match self.transport.refresh_interface(&self.ctx.config.interface) {
            Ok(iface) => self.ctx.set_interface(iface),
            Err(e) => {
                warn!("DHCPv6: {} is gone: {}", self.ctx.config.interface, e);
                return Ok(Flow::Stop);
            }
        }

        match self.state {
            ClientState::InitSelecting => {
                if self.retries_remain() {
                    if self.packet_num == 0 {
                        self.change_listen_mode(ListenMode::Raw)?;
                        self.ctx.new_xid();
                    }
                    self.send_discover();
                    self.timeout = Some(self.ctx.config.discover_timeout);
                    self.packet_num += 1;
                    return Ok(Flow::Continue);
                }
                self.lease_fail()
            }
            ClientState::Requesting => {
                if self.retries_remain() {
                    info!("DHCPv6: Sending REQUEST on {}", self.ctx.iface.name);
                    let msg = build_request(&mut self.ctx);
                    self.send_multicast(&msg);
                    self.timeout = Some(self.ctx.config.discover_timeout);
                    self.packet_num += 1;
                    return Ok(Flow::Continue);
                }
                // Advertise/Request loops are treated like no answer at all.
                self.state = ClientState::InitSelecting;
                self.lease_fail()
            }
            ClientState::Bound => {
                self.state = ClientState::Renewing;
                self.ctx.restart_elapsed();
                self.enter_renew()
            }
            ClientState::Renewing | ClientState::RenewRequested => self.renew_step(),
            ClientState::Rebinding => self.rebind_step(),
            ClientState::Released => {
                self.timeout = None;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn on_signal(&mut self, signal: ClientSignal) -> Result<Flow> {
        match signal {
            ClientSignal::Renew => {
                match self.state {
                    // Initial negotiation in progress, and no going back
                    // from rebinding to renewing.
                    ClientState::InitSelecting
                    | ClientState::Requesting
                    | ClientState::Rebinding => return Ok(Flow::Continue),
                    _ => {}
                }

                // If this renew fails, do not fall back to Bound.
                self.lease_remaining = self.lease_remaining.min(MIN_LEASE);
                self.ctx.restart_elapsed();
                self.packet_num = 0;

                match self.state {
                    ClientState::Bound | ClientState::Renewing => {
                        self.state = ClientState::RenewRequested;
                        return self.enter_renew();
                    }
                    ClientState::RenewRequested => {
                        // Second request in a row: start over.
                        self.change_listen_mode(ListenMode::None)?;
                        self.run_script(ScriptEvent::Deconfig, None);
                    }
                    _ => {
                        self.change_listen_mode(ListenMode::None)?;
                    }
                }
                self.state = ClientState::InitSelecting;
                self.timeout = Some(Duration::ZERO);
                Ok(Flow::Continue)
            }
            ClientSignal::Release => {
                self.perform_release()?;
                self.timeout = None;
                Ok(Flow::Continue)
            }
            ClientSignal::Terminate => {
                info!("DHCPv6: Received SIGTERM");
                Ok(Flow::Stop)
            }
        }
    }

    pub fn on_packet(&mut self, packet: &Received) -> Result<Flow> {
        let msg = match Message::parse(&packet.data) {
            Ok(m) => m,
            Err(e) => {
                debug!("DHCPv6: {}, ignoring", e);
                return Ok(Flow::Continue);
            }
        };

        if msg.xid != self.ctx.xid {
            debug!(
                "DHCPv6: xid {:x} (our is {:x}), ignoring packet",
                msg.xid, self.ctx.xid
            );
            return Ok(Flow::Continue);
        }

        let msg_type = msg.message_type();
        let accepted = match self.state {
            // Rapid commit: a Reply may come instead of an Advertise.
            ClientState::InitSelecting => matches!(
                msg_type,
                Some(MessageType::Advertise) | Some(MessageType::Reply)
            ),
            ClientState::Requesting
            | ClientState::Renewing
            | ClientState::RenewRequested
            | ClientState::Rebinding => msg_type == Some(MessageType::Reply),
            ClientState::Bound | ClientState::Released => false,
        };
        if !accepted {
            debug!("DHCPv6: Unexpected message type {} in {:?}", msg.msg_type, self.state);
            return Ok(Flow::Continue);
        }

        if let Some(status) = find_option(msg.options, code::STATUS_CODE) {
            let data = status.data();
            if data.len() < 2 {
                error!("DHCPv6: Invalid OPTION_STATUS_CODE, ignoring packet");
                return Ok(Flow::Continue);
            }
            let status_code = u16::from_be_bytes([data[0], data[1]]);
            if status_code != 0 {
                let text = String::from_utf8_lossy(&data[2..]).into_owned();
                return self.handle_nak(status_code, &text, msg.options);
            }
        }

        let Some(server_id) = copy_option(msg.options, code::SERVER_ID) else {
            info!("DHCPv6: No server ID, ignoring packet");
            return Ok(Flow::Continue);
        };

        if msg_type == Some(MessageType::Advertise) {
            self.ctx.server_id = Some(server_id);
            self.ctx.server_addr = Some(packet.peer);
            self.change_listen_mode(ListenMode::Raw)?;
            self.state = ClientState::Requesting;
            self.timeout = Some(Duration::ZERO);
            self.packet_num = 0;
            return Ok(Flow::Continue);
        }

        let Some(grant) = self.extract_grant(msg.options) else {
            return Ok(Flow::Continue);
        };

        self.change_listen_mode(ListenMode::None)?;
        self.ctx.server_id = Some(server_id);
        self.ctx.server_addr = Some(packet.peer);
        if self.ctx.config.request_address {
            self.ctx.ia_na = grant.ia_na;
            self.ctx.requested_addr = grant.address;
        }
        if self.ctx.config.request_prefix {
            self.ctx.ia_pd = grant.ia_pd;
        }

        let lease = effective_lease(
            grant.address_lease,
            grant.prefix_lease,
            self.ctx.config.stateless,
        );

        let event = match self.state {
            ClientState::InitSelecting | ClientState::Requesting => ScriptEvent::Bound,
            _ => ScriptEvent::Renew,
        };
        let started = Instant::now();
        self.run_script(event, Some(msg.options));
        self.lease_remaining = lease.saturating_sub(started.elapsed()).max(MIN_LEASE);

        if self.ctx.config.quit_after_lease {
            return Ok(Flow::Stop);
        }
        // Later renew failures should not exit.
        self.exit_if_no_lease = false;

        Ok(self.bound_for_half_lease())
    }

    /// Send a Release if configured to do so on exit.
    pub fn release_on_quit(&mut self) -> Result<()> {
        if self.ctx.config.release_on_quit {
            self.perform_release()?;
        }
        Ok(())
    }

    fn retries_remain(&self) -> bool {
        let retries = self.ctx.config.discover_retries;
        retries == 0 || self.packet_num < retries
    }

    fn lease_fail(&mut self) -> Result<Flow> {
        self.change_listen_mode(ListenMode::None)?;
        self.run_script(ScriptEvent::Leasefail, None);
        if self.exit_if_no_lease {
            info!("DHCPv6: No lease, failing");
            return Ok(Flow::Fail);
        }
        self.timeout = Some(self.ctx.config.tryagain_timeout);
        self.packet_num = 0;
        Ok(Flow::Continue)
    }

    fn enter_renew(&mut self) -> Result<Flow> {
        debug!("DHCPv6: Entering renew state");
        // Listen before sending, replies can be faster than socket setup.
        self.change_listen_mode(ListenMode::Kernel)?;
        self.renew_step()
    }

    fn renew_step(&mut self) -> Result<Flow> {
        if self.packet_num == 0 {
            self.send_renew(true);
            self.timeout = Some(self.ctx.config.discover_timeout);
            self.packet_num += 1;
            return Ok(Flow::Continue);
        }

        debug!("DHCPv6: No response to renew");
        if self.lease_remaining > MIN_LEASE {
            // Some lease time remains, try again later.
            self.change_listen_mode(ListenMode::None)?;
            return Ok(self.bound_for_half_lease());
        }

        self.state = ClientState::Rebinding;
        debug!("DHCPv6: Entering rebinding state");
        self.change_listen_mode(ListenMode::Raw)?;
        self.packet_num = 0;
        self.rebind_step()
    }

    fn rebind_step(&mut self) -> Result<Flow> {
        if !self.lease_remaining.is_zero() && self.packet_num < REBIND_ATTEMPTS {
            self.send_renew(false);
            self.timeout = Some(self.ctx.config.discover_timeout);
            self.packet_num += 1;
            return Ok(Flow::Continue);
        }

        self.change_listen_mode(ListenMode::None)?;
        info!("DHCPv6: Lease lost, entering init state");
        self.run_script(ScriptEvent::Deconfig, None);
        self.state = ClientState::InitSelecting;
        self.ctx.restart_elapsed();
        self.timeout = Some(Duration::ZERO);
        self.packet_num = 0;
        Ok(Flow::Continue)
    }

    fn bound_for_half_lease(&mut self) -> Flow {
        self.timeout = Some(self.lease_remaining / 2);
        self.state = ClientState::Bound;
        self.packet_num = 0;
        Flow::Continue
    }

    fn handle_nak(&mut self, status: u16, text: &str, options: &[u8]) -> Result<Flow> {
        info!("DHCPv6: Received DHCP NAK: {} '{}'", status, text);
        self.change_listen_mode(ListenMode::None)?;
        self.run_script(ScriptEvent::Nak, Some(options));
        if self.state != ClientState::Requesting {
            self.run_script(ScriptEvent::Deconfig, None);
        }
        self.state = ClientState::InitSelecting;
        self.ctx.restart_elapsed();
        self.ctx.requested_addr = None;
        self.packet_num = 0;
        // Avoid excessive network traffic.
        self.timeout = Some(NAK_PAUSE);
        Ok(Flow::Continue)
    }

    fn perform_release(&mut self) -> Result<()> {
        self.change_listen_mode(ListenMode::None)?;

        if matches!(
            self.state,
            ClientState::Bound
                | ClientState::Renewing
                | ClientState::Rebinding
                | ClientState::RenewRequested
        ) {
            info!("DHCPv6: Unicasting a release");
            self.ctx.new_xid();
            let msg = build_release(&mut self.ctx);
            self.send_to_server(&msg);
        }
        info!("DHCPv6: Entering released state");
        self.run_script(ScriptEvent::Deconfig, None);
        self.state = ClientState::Released;
        Ok(())
    }

    /// Validate IA_NA / IA_PD of a Reply. `None` means the packet is ignored.
    fn extract_grant(&self, options: &[u8]) -> Option<Grant> {
        let mut grant = Grant {
            ia_na: None,
            ia_pd: None,
            address: None,
            address_lease: 0,
            prefix_lease: 0,
        };

        if self.ctx.config.request_address {
            let Some(ia_na) = copy_option(options, code::IA_NA) else {
                info!("DHCPv6: No IA_NA option, ignoring packet");
                return None;
            };
            if ia_na.data().len() < IA_HEADER_LEN + 4 + IAADDR_LEN {
                info!("DHCPv6: IA_NA option is too short: {} bytes", ia_na.data().len());
                return None;
            }
            let Some(iaaddr) = find_option(ia_na.ia_options(), code::IAADDR) else {
                info!("DHCPv6: No IAADDR option, ignoring packet");
                return None;
            };
            let data = iaaddr.data();
            if data.len() < IAADDR_LEN {
                info!("DHCPv6: IAADDR option is too short: {} bytes", data.len());
                return None;
            }
            let mut addr = [0u8; 16];
            addr.copy_from_slice(&data[..16]);
            let lease = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            info!("DHCPv6: IPv6 obtained, lease time {}", lease);
            grant.address = Some(Ipv6Addr::from(addr));
            grant.address_lease = lease;
            grant.ia_na = Some(ia_na);
        }

        if self.ctx.config.request_prefix {
            let Some(ia_pd) = copy_option(options, code::IA_PD) else {
                info!("DHCPv6: No IA_PD option, ignoring packet");
                return None;
            };
            if ia_pd.data().len() < IA_HEADER_LEN + 4 + IAPREFIX_LEN {
                info!("DHCPv6: IA_PD option is too short: {} bytes", ia_pd.data().len());
                return None;
            }
            let Some(iaprefix) = find_option(ia_pd.ia_options(), code::IAPREFIX) else {
                info!("DHCPv6: No IAPREFIX option, ignoring packet");
                return None;
            };
            let data = iaprefix.data();
            if data.len() < IAPREFIX_LEN {
                info!("DHCPv6: IAPREFIX option is too short: {} bytes", data.len());
                return None;
            }
            let lease = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            info!("DHCPv6: Prefix obtained, lease time {}", lease);
            grant.prefix_lease = lease;
            grant.ia_pd = Some(ia_pd);
        }

        Some(grant)
    }

    fn send_discover(&mut self) {
        if self.ctx.config.stateless {
            info!("DHCPv6: Sending INFORMATION-REQUEST on {}", self.ctx.iface.name);
            let msg = build_info_request(&mut self.ctx);
            self.send_multicast(&msg);
        } else {
            info!("DHCPv6: Sending SOLICIT on {}", self.ctx.iface.name);
            let msg = build_solicit(&mut self.ctx);
            self.send_multicast(&msg);
        }
    }

    /// Renew (or Information-Request when stateless). `unicast` asks for
    /// the kernel path to the known server; rebinding always multicasts.
    fn send_renew(&mut self, unicast: bool) {
        if self.ctx.config.stateless {
            info!("DHCPv6: Sending INFORMATION-REQUEST on {}", self.ctx.iface.name);
            let msg = build_info_request(&mut self.ctx);
            self.send_multicast(&msg);
            return;
        }

        info!("DHCPv6: Sending RENEW on {}", self.ctx.iface.name);
        let msg = build_renew(&mut self.ctx);
        if unicast && !self.ctx.config.multicast_renew {
            self.send_to_server(&msg);
        } else {
            self.send_multicast(&msg);
        }
    }

    /// Kernel unicast to the last server, or multicast if none is known.
    fn send_to_server(&mut self, msg: &[u8]) {
        let Some(server) = self.ctx.server_addr else {
            self.send_multicast(msg);
            return;
        };
        if let Err(e) =
            self.transport
                .send_unicast(&self.ctx.iface, self.ctx.requested_addr, server, msg)
        {
            warn!("DHCPv6: Failed to send to {}: {}", server, e);
        }
    }

    fn send_multicast(&mut self, msg: &[u8]) {
        if let Err(e) = self.transport.send_multicast(&self.ctx.iface, msg) {
            warn!("DHCPv6: Failed to send multicast on {}: {}", self.ctx.iface.name, e);
        }
    }

    fn change_listen_mode(&mut self, mode: ListenMode) -> Result<()> {
        self.transport.change_listen_mode(mode, &self.ctx.iface)?;
        Ok(())
    }

    fn run_script(&mut self, event: ScriptEvent, options: Option<&[u8]>) {
        let env = build_env(&self.ctx.iface.name, options);
        self.scripts.run(event, &env);
    }
}

/// Lease to track for a grant: the shorter of the two lifetimes when both
/// are present, fixed for stateless replies, and never below [`MIN_LEASE`].
pub fn effective_lease(address_lease: u32, prefix_lease: u32, stateless: bool) -> Duration {
    let address = if address_lease == 0 { prefix_lease } else { address_lease };
    let prefix = if prefix_lease == 0 { address_lease } else { prefix_lease };
    let lease = Duration::from_secs(address.min(prefix).min(MAX_LEASE_SECS) as u64);

    let lease = if stateless { STATELESS_LEASE } else { lease };
    lease.max(MIN_LEASE)
}
