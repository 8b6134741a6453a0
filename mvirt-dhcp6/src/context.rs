//! Per-client negotiation data shared by the packet builder and the state machine.

use std::net::Ipv6Addr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::dhcp6::codec::OptionBuf;
use crate::dhcp6::options::{ExtraOption, code, insert_extra};
use crate::network::Interface;

/// Everything the client knows about the current negotiation.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub config: Config,
    pub iface: Interface,
    /// Options appended to every outgoing message, ordered by code.
    /// Always holds a Client Identifier.
    pub options: Vec<ExtraOption>,
    /// Whether the Client Identifier is our DUID-LL and must follow the MAC.
    default_client_id: bool,
    /// Transaction id; only the low 24 bits are used.
    pub xid: u32,
    /// IA_NA sent in the last Solicit or received in the last Reply.
    pub ia_na: Option<OptionBuf>,
    pub ia_pd: Option<OptionBuf>,
    /// Server Identifier from the last Advertise/Reply.
    pub server_id: Option<OptionBuf>,
    /// Address to hint in Solicit and to send Renew/Release from.
    pub requested_addr: Option<Ipv6Addr>,
    /// Source of the last accepted packet.
    pub server_addr: Option<Ipv6Addr>,
    /// When the first packet of this negotiation was sent.
    first_sent: Option<Instant>,
}

impl ClientContext {
    pub fn new(config: Config, iface: Interface) -> Self {
        let mut options = config.extra_options.clone();
        let default_client_id = !options.iter().any(|o| o.code == code::CLIENT_ID);
        if default_client_id {
            insert_extra(
                &mut options,
                ExtraOption::new(code::CLIENT_ID, generate_duid_ll(&iface.mac)),
            );
        }
        let requested_addr = config.requested_addr;

        Self {
            config,
            iface,
            options,
            default_client_id,
            xid: 0,
            ia_na: None,
            ia_pd: None,
            server_id: None,
            requested_addr,
            server_addr: None,
            first_sent: None,
        }
    }

    /// Replace the interface data, keeping a default client id in sync with the MAC.
    pub fn set_interface(&mut self, iface: Interface) {
        if self.default_client_id && iface.mac != self.iface.mac {
            insert_extra(
                &mut self.options,
                ExtraOption::new(code::CLIENT_ID, generate_duid_ll(&iface.mac)),
            );
        }
        self.iface = iface;
    }

    /// Client Identifier option as sent on the wire.
    pub fn client_id(&self) -> Option<&ExtraOption> {
        self.options.iter().find(|o| o.code == code::CLIENT_ID)
    }

    /// Start a new transaction.
    pub fn new_xid(&mut self) -> u32 {
        self.xid = generate_xid();
        self.xid
    }

    /// Seconds since the first packet of this negotiation, for the
    /// Elapsed Time option. The first call starts the clock.
    pub fn elapsed_time(&mut self) -> u16 {
        let now = Instant::now();
        let first = *self.first_sent.get_or_insert(now);
        let secs = now.duration_since(first).as_secs();
        secs.min(0xffff) as u16
    }

    /// Make the next packet count elapsed time from zero again.
    pub fn restart_elapsed(&mut self) {
        self.first_sent = None;
    }
}

/// DUID-LL: type 3, hardware type 1 (Ethernet), MAC.
pub fn generate_duid_ll(mac: &[u8; 6]) -> Vec<u8> {
    let mut duid = vec![0x00, 0x03, 0x00, 0x01];
    duid.extend_from_slice(mac);
    duid
}

/// Random-enough 24-bit transaction id.
fn generate_xid() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos ^ (std::process::id() << 8)) & 0x00ff_ffff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(mac: [u8; 6]) -> Interface {
        Interface {
            name: "eth0".to_string(),
            index: 2,
            mac,
            link_local: "fe80::1".parse().unwrap(),
        }
    }

    #[test]
    fn test_duid_ll() {
        assert_eq!(
            generate_duid_ll(&[1, 2, 3, 4, 5, 6]),
            vec![0, 3, 0, 1, 1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn test_xid_is_24_bit() {
        let mut ctx = ClientContext::new(Config::default(), iface([0; 6]));
        for _ in 0..16 {
            assert!(ctx.new_xid() <= 0x00ff_ffff);
        }
    }

    #[test]
    fn test_default_client_id_follows_mac() {
        let mut ctx = ClientContext::new(Config::default(), iface([1, 2, 3, 4, 5, 6]));
        assert_eq!(ctx.client_id().unwrap().data, generate_duid_ll(&[1, 2, 3, 4, 5, 6]));

        ctx.set_interface(iface([6, 5, 4, 3, 2, 1]));
        assert_eq!(ctx.client_id().unwrap().data, generate_duid_ll(&[6, 5, 4, 3, 2, 1]));
        assert_eq!(ctx.options.len(), 1);
    }

    #[test]
    fn test_user_client_id_is_kept() {
        let mut config = Config::default();
        config.add_extra_option("1:00020000abcd").unwrap();
        let mut ctx = ClientContext::new(config, iface([1, 2, 3, 4, 5, 6]));
        ctx.set_interface(iface([6, 5, 4, 3, 2, 1]));
        assert_eq!(ctx.client_id().unwrap().data, vec![0, 2, 0, 0, 0xab, 0xcd]);
    }

    #[test]
    fn test_elapsed_time_starts_at_zero() {
        let mut ctx = ClientContext::new(Config::default(), iface([0; 6]));
        assert_eq!(ctx.elapsed_time(), 0);
        assert_eq!(ctx.elapsed_time(), 0);
        ctx.restart_elapsed();
        assert_eq!(ctx.elapsed_time(), 0);
    }

    #[test]
    fn test_elapsed_time_saturates() {
        let mut ctx = ClientContext::new(Config::default(), iface([0; 6]));
        // Monotonic clocks may start at boot.
        let Some(past) = Instant::now().checked_sub(std::time::Duration::from_secs(700)) else {
            return;
        };
        ctx.first_sent = Some(past);
        assert_eq!(ctx.elapsed_time(), 0xffff);

        ctx.restart_elapsed();
        assert_eq!(ctx.elapsed_time(), 0);
    }

    #[test]
    fn test_elapsed_time_counts_seconds() {
        let mut ctx = ClientContext::new(Config::default(), iface([0; 6]));
        let Some(past) = Instant::now().checked_sub(std::time::Duration::from_secs(42)) else {
            return;
        };
        ctx.first_sent = Some(past);
        let elapsed = ctx.elapsed_time();
        assert!((42..=43).contains(&elapsed));
    }
}
