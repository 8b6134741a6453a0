//! Bounds-checked traversal of DHCPv6 option lists.
//!
//! Every option is a 2-byte code, a 2-byte length and `length` bytes of
//! payload. Only codes and lengths below 256 are accepted: an option with a
//! nonzero high byte in either field, or whose length runs past the end of
//! the buffer, ends the traversal. Nothing after a malformed option is
//! looked at.

use std::fmt::Write;
use std::net::Ipv6Addr;

#[cfg(any(feature = "rfc3646", feature = "rfc4704"))]
use crate::dhcp6::domain::decode_domain_list;
use crate::dhcp6::options::{OptionKind, code, lookup_code};

/// Size of the code + length header.
pub const OPTION_HEADER_LEN: usize = 4;

/// IAID, T1 and T2 preceding the sub-options of an IA_NA or IA_PD.
pub const IA_HEADER_LEN: usize = 12;

/// Minimum IAADDR payload: address, preferred and valid lifetime.
pub const IAADDR_LEN: usize = 24;

/// Minimum IAPREFIX payload: lifetimes, prefix length and prefix.
pub const IAPREFIX_LEN: usize = 25;

/// A borrowed view of one option inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOption<'a> {
    raw: &'a [u8],
}

impl<'a> RawOption<'a> {
    pub fn code(&self) -> u16 {
        u16::from_be_bytes([self.raw[0], self.raw[1]])
    }

    /// Payload without the header.
    pub fn data(&self) -> &'a [u8] {
        &self.raw[OPTION_HEADER_LEN..]
    }

    /// Full TLV including the header.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    pub fn to_buf(&self) -> OptionBuf {
        OptionBuf(self.raw.to_vec())
    }
}

/// Iterator over the options in a buffer. Stops for good at the first
/// malformed option.
#[derive(Debug, Clone)]
pub struct OptionIter<'a> {
    rest: &'a [u8],
}

impl<'a> OptionIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { rest: buf }
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = RawOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest;
        if rest.len() < OPTION_HEADER_LEN {
            self.rest = &[];
            return None;
        }
        let len = rest[3] as usize;
        if rest[0] != 0 || rest[2] != 0 || OPTION_HEADER_LEN + len > rest.len() {
            self.rest = &[];
            return None;
        }
        let (raw, tail) = rest.split_at(OPTION_HEADER_LEN + len);
        self.rest = tail;
        Some(RawOption { raw })
    }
}

impl std::iter::FusedIterator for OptionIter<'_> {}

/// First option with the given code, or `None` if absent or if the list is
/// malformed before it.
pub fn find_option(buf: &[u8], code: u16) -> Option<RawOption<'_>> {
    OptionIter::new(buf).find(|o| o.code() == code)
}

/// Owned copy of the full TLV that [`find_option`] would return.
pub fn copy_option(buf: &[u8], code: u16) -> Option<OptionBuf> {
    find_option(buf, code).map(|o| o.to_buf())
}

/// An owned option (header and payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionBuf(Vec<u8>);

impl OptionBuf {
    /// Build an option from its code and payload.
    pub fn new(code: u16, data: &[u8]) -> Self {
        let mut raw = Vec::with_capacity(OPTION_HEADER_LEN + data.len());
        raw.extend_from_slice(&code.to_be_bytes());
        debug_assert!(data.len() <= u16::MAX as usize);
        raw.extend_from_slice(&(data.len() as u16).to_be_bytes());
        raw.extend_from_slice(data);
        Self(raw)
    }

    pub fn code(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    pub fn data(&self) -> &[u8] {
        &self.0[OPTION_HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Sub-options of an IA_NA / IA_PD, after IAID, T1 and T2.
    pub fn ia_options(&self) -> &[u8] {
        self.data().get(IA_HEADER_LEN..).unwrap_or(&[])
    }
}

/// Format an address the way the configuration script expects it:
/// eight zero-padded lowercase groups, no `::` compression.
pub fn fmt_ipv6_full(addr: &Ipv6Addr) -> String {
    let mut out = String::with_capacity(39);
    for (i, seg) in addr.segments().iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{seg:04x}");
    }
    out
}

fn ipv6_at(data: &[u8], offset: usize) -> Option<Ipv6Addr> {
    let bytes: [u8; 16] = data.get(offset..offset + 16)?.try_into().ok()?;
    Some(Ipv6Addr::from(bytes))
}

fn u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Text up to the first NUL.
fn payload_str(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Decode every recognised option in `buf` into `name=value` strings.
pub fn decode_to_env(buf: &[u8]) -> Vec<String> {
    let mut env = Vec::new();
    decode_into(buf, &mut env);
    env
}

fn decode_into(buf: &[u8], env: &mut Vec<String>) {
    for opt in OptionIter::new(buf) {
        let data = opt.data();
        match opt.code() {
            code::IA_NA | code::IA_PD => {
                if let Some(sub) = data.get(IA_HEADER_LEN..) {
                    decode_into(sub, env);
                }
            }
            code::IAADDR => {
                if data.len() < IAADDR_LEN {
                    continue;
                }
                if let (Some(addr), Some(lease)) = (ipv6_at(data, 0), u32_at(data, 20)) {
                    env.push(format!("ipv6={}", fmt_ipv6_full(&addr)));
                    env.push(format!("lease={lease}"));
                }
            }
            code::IAPREFIX => {
                if data.len() < IAPREFIX_LEN {
                    continue;
                }
                if let (Some(lease), Some(prefix)) = (u32_at(data, 4), ipv6_at(data, 9)) {
                    env.push(format!("ipv6prefix_lease={lease}"));
                    env.push(format!("ipv6prefix={}/{}", fmt_ipv6_full(&prefix), data[8]));
                }
            }
            #[cfg(feature = "rfc3646")]
            code::DNS_SERVERS => {
                if data.len() % 16 != 0 {
                    continue;
                }
                let list: Vec<String> = data
                    .chunks_exact(16)
                    .filter_map(|c| ipv6_at(c, 0))
                    .map(|a| fmt_ipv6_full(&a))
                    .collect();
                env.push(format!("dns={}", list.join(" ")));
            }
            #[cfg(feature = "rfc3646")]
            code::DOMAIN_LIST => {
                if let Some(list) = decode_domain_list(data) {
                    env.push(format!("search={list}"));
                }
            }
            #[cfg(feature = "rfc4704")]
            code::CLIENT_FQDN => {
                let Some((&flags, name)) = data.split_first() else {
                    continue;
                };
                // Some servers put the plain name here without the flags
                // byte. Reserved flag bits being set gives them away.
                if flags & 0xf8 != 0 {
                    env.push(format!("fqdn={}", payload_str(data)));
                } else if let Some(fqdn) = decode_domain_list(name) {
                    env.push(format!("fqdn={fqdn}"));
                }
            }
            other => {
                if let Some(def) = lookup_code(other) {
                    if def.kind == OptionKind::String {
                        env.push(format!("{}={}", def.env, payload_str(data)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlv(code: u16, data: &[u8]) -> Vec<u8> {
        OptionBuf::new(code, data).as_bytes().to_vec()
    }

    fn iaaddr(addr: Ipv6Addr, lease: u32) -> Vec<u8> {
        let mut d = addr.octets().to_vec();
        d.extend_from_slice(&lease.to_be_bytes());
        d.extend_from_slice(&lease.to_be_bytes());
        tlv(code::IAADDR, &d)
    }

    #[test]
    fn test_find_option() {
        let mut buf = tlv(code::CLIENT_ID, &[1, 2, 3]);
        buf.extend(tlv(code::SERVER_ID, &[4, 5]));
        let opt = find_option(&buf, code::SERVER_ID).unwrap();
        assert_eq!(opt.data(), &[4, 5]);
        assert_eq!(opt.as_bytes(), &[0, 2, 0, 2, 4, 5]);
        assert!(find_option(&buf, code::IA_NA).is_none());
    }

    #[test]
    fn test_find_option_stops_at_overrun() {
        let mut buf = vec![0, 1, 0, 200, 0];
        buf.extend(tlv(code::SERVER_ID, &[4, 5]));
        assert!(find_option(&buf, code::SERVER_ID).is_none());
    }

    #[test]
    fn test_find_option_stops_at_bogus_code() {
        let mut buf = vec![1, 1, 0, 0];
        buf.extend(tlv(code::SERVER_ID, &[4, 5]));
        assert!(find_option(&buf, code::SERVER_ID).is_none());

        let mut buf = vec![0, 1, 1, 0];
        buf.extend(tlv(code::SERVER_ID, &[4, 5]));
        assert!(find_option(&buf, code::SERVER_ID).is_none());
    }

    #[test]
    fn test_copy_option_matches_find() {
        let mut buf = tlv(code::CLIENT_ID, &[9; 10]);
        buf.extend(tlv(code::STATUS_CODE, &[0, 0]));
        let found = find_option(&buf, code::STATUS_CODE).unwrap();
        let copied = copy_option(&buf, code::STATUS_CODE).unwrap();
        assert_eq!(copied.as_bytes(), found.as_bytes());
        assert_eq!(copied.code(), code::STATUS_CODE);
    }

    #[test]
    fn test_fmt_ipv6_full() {
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(fmt_ipv6_full(&addr), "2001:0db8:0000:0000:0000:0000:0000:0001");
    }

    #[test]
    fn test_decode_ia_na() {
        let addr: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let mut ia = vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        ia.extend(iaaddr(addr, 3600));
        let env = decode_to_env(&tlv(code::IA_NA, &ia));
        assert_eq!(
            env,
            vec![
                "ipv6=2001:0db8:0000:0000:0000:0000:0000:0010".to_string(),
                "lease=3600".to_string(),
            ]
        );
    }

    #[test]
    fn test_decode_short_iaaddr_ignored() {
        let mut ia = vec![0; 12];
        ia.extend(tlv(code::IAADDR, &[0; 20]));
        assert!(decode_to_env(&tlv(code::IA_NA, &ia)).is_empty());
    }

    #[test]
    fn test_decode_ia_pd() {
        let mut prefix = Vec::new();
        prefix.extend_from_slice(&1000u32.to_be_bytes());
        prefix.extend_from_slice(&7200u32.to_be_bytes());
        prefix.push(56);
        prefix.extend_from_slice(&"2001:db8:ab00::".parse::<Ipv6Addr>().unwrap().octets());
        let mut ia = vec![0; 12];
        ia.extend(tlv(code::IAPREFIX, &prefix));
        let env = decode_to_env(&tlv(code::IA_PD, &ia));
        assert_eq!(env[0], "ipv6prefix_lease=7200");
        assert_eq!(env[1], "ipv6prefix=2001:0db8:ab00:0000:0000:0000:0000:0000/56");
    }

    #[test]
    #[cfg(feature = "rfc3646")]
    fn test_decode_dns_and_search() {
        let a: Ipv6Addr = "2001:db8::53".parse().unwrap();
        let b: Ipv6Addr = "2001:db8::54".parse().unwrap();
        let mut dns = a.octets().to_vec();
        dns.extend_from_slice(&b.octets());
        let mut buf = tlv(code::DNS_SERVERS, &dns);
        buf.extend(tlv(code::DNS_SERVERS, &[0; 17]));
        let search = crate::dhcp6::domain::encode_domain_list(["example.com", "lan"]).unwrap();
        buf.extend(tlv(code::DOMAIN_LIST, &search));

        let env = decode_to_env(&buf);
        assert_eq!(env.len(), 2);
        assert_eq!(
            env[0],
            "dns=2001:0db8:0000:0000:0000:0000:0000:0053 2001:0db8:0000:0000:0000:0000:0000:0054"
        );
        assert_eq!(env[1], "search=example.com lan");
    }

    #[test]
    #[cfg(feature = "rfc4704")]
    fn test_decode_fqdn() {
        let mut data = vec![0];
        data.extend(crate::dhcp6::domain::encode_domain_list(["host.example.com"]).unwrap());
        assert_eq!(decode_to_env(&tlv(code::CLIENT_FQDN, &data)), vec!["fqdn=host.example.com"]);

        // Plain string from a server that skips the flags byte
        let env = decode_to_env(&tlv(code::CLIENT_FQDN, b"host.example.com"));
        assert_eq!(env, vec!["fqdn=host.example.com"]);

        assert!(decode_to_env(&tlv(code::CLIENT_FQDN, &[])).is_empty());
    }

    #[test]
    #[cfg(feature = "rfc4833")]
    fn test_decode_string_options() {
        let mut buf = tlv(code::TZ_POSIX, b"CET-1CEST");
        buf.extend(tlv(code::TZ_NAME, b"Europe/Berlin"));
        buf.extend(tlv(code::PXE_PATH_PREFIX, b"tftp://boot/\0junk"));
        assert_eq!(
            decode_to_env(&buf),
            vec!["tz=CET-1CEST", "tz_name=Europe/Berlin", "pxepathprefix=tftp://boot/"]
        );
    }

    #[test]
    fn test_decode_stops_at_malformed() {
        let mut buf = tlv(code::PXE_CONF_FILE, b"a");
        buf.extend_from_slice(&[0, 0xd2, 0, 50, b'x']);
        buf.extend(tlv(code::PXE_CONF_FILE, b"b"));
        assert_eq!(decode_to_env(&buf), vec!["pxeconffile=a"]);
    }

    #[test]
    fn test_decode_skips_unknown() {
        let mut buf = tlv(code::ORO, &[0, 23]);
        buf.extend(tlv(99, b"zz"));
        buf.extend(tlv(code::PXE_CONF_FILE, b"cfg"));
        assert_eq!(decode_to_env(&buf), vec!["pxeconffile=cfg"]);
    }
}
