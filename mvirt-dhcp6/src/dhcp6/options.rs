//! DHCPv6 option codes, message types and the client option table.

use std::net::Ipv6Addr;

use crate::dhcp6::domain::encode_domain_list;
use crate::error::ConfigError;

/// Option codes understood by the client (RFC 3315, 3633, 3646, 4704, 4833, 5970).
pub mod code {
    pub const CLIENT_ID: u16 = 1;
    pub const SERVER_ID: u16 = 2;
    pub const IA_NA: u16 = 3;
    pub const IAADDR: u16 = 5;
    pub const ORO: u16 = 6;
    pub const ELAPSED_TIME: u16 = 8;
    pub const STATUS_CODE: u16 = 13;
    pub const DNS_SERVERS: u16 = 23;
    pub const DOMAIN_LIST: u16 = 24;
    pub const IA_PD: u16 = 25;
    pub const IAPREFIX: u16 = 26;
    pub const CLIENT_FQDN: u16 = 39;
    pub const TZ_POSIX: u16 = 41;
    pub const TZ_NAME: u16 = 42;
    pub const BOOT_URL: u16 = 59;
    pub const BOOT_PARAM: u16 = 60;
    pub const PXE_CONF_FILE: u16 = 0xd1;
    pub const PXE_PATH_PREFIX: u16 = 0xd2;
}

/// DHCPv6 message types (RFC 3315 Section 5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Solicit),
            2 => Some(MessageType::Advertise),
            3 => Some(MessageType::Request),
            4 => Some(MessageType::Confirm),
            5 => Some(MessageType::Renew),
            6 => Some(MessageType::Rebind),
            7 => Some(MessageType::Reply),
            8 => Some(MessageType::Release),
            9 => Some(MessageType::Decline),
            10 => Some(MessageType::Reconfigure),
            11 => Some(MessageType::InformationRequest),
            _ => None,
        }
    }
}

/// How an option payload is rendered into the script environment
/// and parsed from `-x` arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Concatenated 16-byte IPv6 addresses.
    AddressList,
    /// RFC 1035 encoded domain names.
    DomainList,
    /// Flags byte followed by an encoded domain name.
    Fqdn,
    /// Raw text.
    String,
}

/// An entry in the client option table.
#[derive(Debug, Clone, Copy)]
pub struct OptionDef {
    /// Name accepted by `-O` and `-x`.
    pub name: &'static str,
    /// Environment variable the decoded value is exported as.
    pub env: &'static str,
    pub code: u16,
    pub kind: OptionKind,
    /// Placed in the ORO unless `-o` is given.
    pub requested_by_default: bool,
}

const fn def(
    name: &'static str,
    env: &'static str,
    code: u16,
    kind: OptionKind,
    requested_by_default: bool,
) -> OptionDef {
    OptionDef {
        name,
        env,
        code,
        kind,
        requested_by_default,
    }
}

/// Options the client knows by name.
pub const OPTION_TABLE: &[OptionDef] = &[
    #[cfg(feature = "rfc3646")]
    def("dns", "dns", code::DNS_SERVERS, OptionKind::AddressList, true),
    #[cfg(feature = "rfc3646")]
    def("search", "search", code::DOMAIN_LIST, OptionKind::DomainList, true),
    #[cfg(feature = "rfc4704")]
    def("fqdn", "fqdn", code::CLIENT_FQDN, OptionKind::Fqdn, false),
    #[cfg(feature = "rfc4833")]
    def("tz", "tz", code::TZ_POSIX, OptionKind::String, false),
    #[cfg(feature = "rfc4833")]
    def("timezone", "tz_name", code::TZ_NAME, OptionKind::String, false),
    #[cfg(feature = "rfc5970")]
    def("bootfile_url", "bootfile_url", code::BOOT_URL, OptionKind::String, false),
    #[cfg(feature = "rfc5970")]
    def("bootfile_param", "bootfile_param", code::BOOT_PARAM, OptionKind::String, false),
    def("pxeconffile", "pxeconffile", code::PXE_CONF_FILE, OptionKind::String, false),
    def("pxepathprefix", "pxepathprefix", code::PXE_PATH_PREFIX, OptionKind::String, false),
];

/// Look up a table entry by its name.
pub fn lookup_name(name: &str) -> Option<&'static OptionDef> {
    OPTION_TABLE.iter().find(|d| d.name == name)
}

/// Look up a table entry by its option code.
pub fn lookup_code(code: u16) -> Option<&'static OptionDef> {
    OPTION_TABLE.iter().find(|d| d.code == code)
}

/// 256-bit mask of option codes placed in the Option Request Option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedOptions([u8; 32]);

impl RequestedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask holding every table entry requested by default.
    pub fn with_defaults() -> Self {
        let mut mask = Self::new();
        for d in OPTION_TABLE.iter().filter(|d| d.requested_by_default) {
            mask.set(d.code as u8);
        }
        mask
    }

    pub fn set(&mut self, code: u8) {
        self.0[(code >> 3) as usize] |= 1 << (code & 7);
    }

    pub fn contains(&self, code: u8) -> bool {
        self.0[(code >> 3) as usize] & (1 << (code & 7)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Requested codes in ascending order. Code 0 is reserved and never listed.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (1..=255u8).filter(|c| self.contains(*c))
    }
}

/// Parse a `-O` argument: a number up to 254 or a table name.
pub fn parse_request_option(arg: &str) -> Result<u8, ConfigError> {
    if let Some(n) = parse_number(arg).filter(|n| *n <= 254) {
        return Ok(n as u8);
    }
    lookup_name(arg)
        .map(|d| d.code as u8)
        .ok_or_else(|| ConfigError::UnknownOption(arg.to_string()))
}

fn parse_number(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Highest code accepted for `-x`. Codes and lengths above a byte end
/// option traversal, see `codec::OptionIter`.
pub const MAX_EXTRA_CODE: u16 = 254;

/// Longest payload accepted for `-x`.
pub const MAX_EXTRA_LEN: usize = 255;

/// A user-supplied option appended verbatim to every outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraOption {
    pub code: u16,
    pub data: Vec<u8>,
}

impl ExtraOption {
    pub fn new(code: u16, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    /// Wire form: code, length, payload.
    pub fn to_tlv(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.extend_from_slice(&self.code.to_be_bytes());
        debug_assert!(self.data.len() <= u16::MAX as usize);
        out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// Insert keeping the list ordered by code; a repeated code replaces the earlier value.
pub fn insert_extra(list: &mut Vec<ExtraOption>, opt: ExtraOption) {
    match list.binary_search_by_key(&opt.code, |o| o.code) {
        Ok(i) => list[i] = opt,
        Err(i) => list.insert(i, opt),
    }
}

/// Parse a `-x OPT:VAL` argument.
///
/// `OPT` is a table name or a number. The value is encoded according to the
/// option kind; codes outside the table take a hex byte string.
pub fn parse_extra_option(arg: &str) -> Result<ExtraOption, ConfigError> {
    let bad = |reason: &str| ConfigError::BadOptionValue {
        value: arg.to_string(),
        reason: reason.to_string(),
    };

    let (name, value) = arg.split_once(':').ok_or_else(|| bad("expected OPT:VAL"))?;

    let code = match lookup_name(name) {
        Some(d) => d.code,
        None => {
            let n = parse_number(name).ok_or_else(|| ConfigError::UnknownOption(name.to_string()))?;
            u16::try_from(n).map_err(|_| bad("option code out of range"))?
        }
    };
    if code == 0 || code > MAX_EXTRA_CODE {
        return Err(bad("option code out of range"));
    }

    let data = match lookup_code(code) {
        Some(d) => encode_value(d.kind, value).map_err(bad)?,
        None => parse_hex(value).ok_or_else(|| bad("expected hex bytes"))?,
    };
    if data.len() > MAX_EXTRA_LEN {
        return Err(bad("value too long"));
    }
    Ok(ExtraOption::new(code, data))
}

fn encode_value(kind: OptionKind, value: &str) -> Result<Vec<u8>, &'static str> {
    match kind {
        OptionKind::String => Ok(value.as_bytes().to_vec()),
        OptionKind::AddressList => {
            let mut out = Vec::new();
            for word in value.split_whitespace() {
                let addr: Ipv6Addr = word.parse().map_err(|_| "expected IPv6 addresses")?;
                out.extend_from_slice(&addr.octets());
            }
            if out.is_empty() {
                return Err("expected IPv6 addresses");
            }
            Ok(out)
        }
        OptionKind::DomainList => encode_domain_list(value.split_whitespace()),
        OptionKind::Fqdn => {
            // Flags byte with S/O/N clear, then the name.
            let mut out = vec![0];
            out.extend(encode_domain_list(std::iter::once(value))?);
            Ok(out)
        }
    }
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
