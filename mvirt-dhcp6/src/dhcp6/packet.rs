//! Construction of outgoing messages and a view of incoming ones.

use crate::context::ClientContext;
use crate::dhcp6::codec::{IA_HEADER_LEN, IAADDR_LEN, OptionBuf};
use crate::dhcp6::options::{MessageType, code};
use crate::error::NetworkError;

/// msg-type plus the 24-bit transaction id.
pub const MESSAGE_HEADER_LEN: usize = 4;

/// FQDN option with no flags and an empty name: the server should
/// update PTR records only.
#[cfg(feature = "rfc4704")]
const FQDN_REQUEST: [u8; 6] = [0, code::CLIENT_FQDN as u8, 0, 2, 0, 0];

/// Appends options to a message buffer.
#[derive(Debug)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    /// Header and the Elapsed Time option, which every message carries.
    pub fn new(msg_type: MessageType, xid: u32, elapsed: u16) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(msg_type as u8);
        buf.extend_from_slice(&xid.to_be_bytes()[1..]);
        let mut builder = Self { buf };
        builder.option(code::ELAPSED_TIME, &elapsed.to_be_bytes());
        builder
    }

    pub fn option(&mut self, code: u16, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&code.to_be_bytes());
        debug_assert!(data.len() <= u16::MAX as usize);
        self.buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(data);
        self
    }

    /// Append an already encoded option.
    pub fn raw(&mut self, tlv: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(tlv);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Append ORO, FQDN request and the user options.
pub fn add_client_options(builder: &mut MessageBuilder, ctx: &ClientContext) {
    let oro: Vec<u8> = ctx
        .config
        .requested_options
        .iter()
        .flat_map(|c| (c as u16).to_be_bytes())
        .collect();
    if !oro.is_empty() {
        builder.option(code::ORO, &oro);
    }

    #[cfg(feature = "rfc4704")]
    builder.raw(&FQDN_REQUEST);

    for opt in &ctx.options {
        builder.option(opt.code, &opt.data);
    }
}

fn start(ctx: &mut ClientContext, msg_type: MessageType) -> MessageBuilder {
    let elapsed = ctx.elapsed_time();
    MessageBuilder::new(msg_type, ctx.xid, elapsed)
}

/// Server id, IA_NA and IA_PD as currently held by the context.
fn add_identity(builder: &mut MessageBuilder, ctx: &ClientContext) {
    for opt in [&ctx.server_id, &ctx.ia_na, &ctx.ia_pd].into_iter().flatten() {
        builder.raw(opt.as_bytes());
    }
}

pub fn build_info_request(ctx: &mut ClientContext) -> Vec<u8> {
    let mut b = start(ctx, MessageType::InformationRequest);
    add_client_options(&mut b, ctx);
    b.finish()
}

/// Solicit with freshly built IAs. The IA_NA carries the requested
/// address as a hint, if there is one.
pub fn build_solicit(ctx: &mut ClientContext) -> Vec<u8> {
    let mut b = start(ctx, MessageType::Solicit);
    let iaid = ctx.iface.iaid();

    ctx.ia_na = None;
    if ctx.config.request_address {
        let mut data = vec![0u8; IA_HEADER_LEN];
        data[..4].copy_from_slice(&iaid);
        if let Some(addr) = ctx.requested_addr {
            let mut iaaddr = vec![0u8; IAADDR_LEN];
            iaaddr[..16].copy_from_slice(&addr.octets());
            data.extend_from_slice(OptionBuf::new(code::IAADDR, &iaaddr).as_bytes());
        }
        let ia = OptionBuf::new(code::IA_NA, &data);
        b.raw(ia.as_bytes());
        ctx.ia_na = Some(ia);
    }

    ctx.ia_pd = None;
    if ctx.config.request_prefix {
        let mut data = vec![0u8; IA_HEADER_LEN];
        data[..4].copy_from_slice(&iaid);
        let ia = OptionBuf::new(code::IA_PD, &data);
        b.raw(ia.as_bytes());
        ctx.ia_pd = Some(ia);
    }

    add_client_options(&mut b, ctx);
    b.finish()
}

pub fn build_request(ctx: &mut ClientContext) -> Vec<u8> {
    let mut b = start(ctx, MessageType::Request);
    add_identity(&mut b, ctx);
    add_client_options(&mut b, ctx);
    b.finish()
}

/// Renew. Also used while rebinding.
pub fn build_renew(ctx: &mut ClientContext) -> Vec<u8> {
    let mut b = start(ctx, MessageType::Renew);
    add_identity(&mut b, ctx);
    add_client_options(&mut b, ctx);
    b.finish()
}

/// Release carries the identity and the Client Identifier only.
pub fn build_release(ctx: &mut ClientContext) -> Vec<u8> {
    let mut b = start(ctx, MessageType::Release);
    add_identity(&mut b, ctx);
    if let Some(ci) = ctx.client_id() {
        b.option(ci.code, &ci.data);
    }
    b.finish()
}

/// A received message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub msg_type: u8,
    /// 24-bit transaction id.
    pub xid: u32,
    pub options: &'a [u8],
}

impl<'a> Message<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, NetworkError> {
        if buf.len() < MESSAGE_HEADER_LEN {
            return Err(NetworkError::InvalidPacket(format!(
                "message too short: {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            msg_type: buf[0],
            xid: u32::from_be_bytes([0, buf[1], buf[2], buf[3]]),
            options: &buf[MESSAGE_HEADER_LEN..],
        })
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }
}
