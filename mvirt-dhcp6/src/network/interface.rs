//! Interface index, hardware address and link-local address lookup.

use crate::error::NetworkError;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;
use std::fs;
use std::net::Ipv6Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub mac: [u8; 6],
    /// fe80::/10 address raw frames are sent from.
    pub link_local: Ipv6Addr,
}

impl Interface {
    /// Read index, MAC and link-local address of `name`.
    pub fn read(name: &str) -> Result<Self, NetworkError> {
        let index = if_nametoindex(name).map_err(|_| NetworkError::NoInterface(name.to_string()))?;
        let mac = read_mac_address(name)?;
        let link_local =
            find_link_local(name)?.ok_or_else(|| NetworkError::NoLinkLocal(name.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            index,
            mac,
            link_local,
        })
    }

    /// IAID derived from the last four MAC bytes, stable across restarts.
    pub fn iaid(&self) -> [u8; 4] {
        [self.mac[2], self.mac[3], self.mac[4], self.mac[5]]
    }
}

fn read_mac_address(name: &str) -> Result<[u8; 6], NetworkError> {
    let path = format!("/sys/class/net/{}/address", name);
    let mac_str =
        fs::read_to_string(&path).map_err(|_| NetworkError::NoInterface(name.to_string()))?;

    parse_mac_address(mac_str.trim())
}

pub fn parse_mac_address(s: &str) -> Result<[u8; 6], NetworkError> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(NetworkError::BadMacAddress(s.to_string()));
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16)
            .map_err(|_| NetworkError::BadMacAddress(s.to_string()))?;
    }

    Ok(mac)
}

fn find_link_local(name: &str) -> Result<Option<Ipv6Addr>, NetworkError> {
    let addrs = getifaddrs()?;
    Ok(addrs
        .filter(|ifa| ifa.interface_name == name)
        .filter_map(|ifa| ifa.address?.as_sockaddr_in6().map(|sin6| sin6.ip()))
        .find(is_link_local))
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac_address() {
        assert_eq!(
            parse_mac_address("52:54:00:12:34:56").unwrap(),
            [0x52, 0x54, 0x00, 0x12, 0x34, 0x56]
        );
        assert!(matches!(
            parse_mac_address("52:54:00:12:34"),
            Err(NetworkError::BadMacAddress(_))
        ));
        assert!(matches!(
            parse_mac_address("52:54:00:12:34:zz"),
            Err(NetworkError::BadMacAddress(_))
        ));
    }

    #[test]
    fn test_iaid_from_mac() {
        let iface = Interface {
            name: "eth0".to_string(),
            index: 2,
            mac: [0x52, 0x54, 0x00, 0x12, 0x34, 0x56],
            link_local: "fe80::1".parse().unwrap(),
        };
        assert_eq!(iface.iaid(), [0x00, 0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_is_link_local() {
        assert!(is_link_local(&"fe80::5054:ff:fe12:3456".parse().unwrap()));
        assert!(!is_link_local(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_missing_interface() {
        assert!(matches!(
            Interface::read("nosuchif0"),
            Err(NetworkError::NoInterface(_))
        ));
    }
}
