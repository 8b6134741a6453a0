//! Runtime configuration of the client.

use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::dhcp6::options::{
    ExtraOption, RequestedOptions, insert_extra, parse_extra_option, parse_request_option,
};
use crate::error::ConfigError;

pub const DEFAULT_INTERFACE: &str = "eth0";
pub const DEFAULT_SCRIPT: &str = "/usr/share/mvirt/dhcp6.script";
pub const DHCP6_CLIENT_PORT: u16 = 546;
pub const DHCP6_SERVER_PORT: u16 = 547;

/// Configuration for one client instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to negotiate on.
    pub interface: String,
    pub pidfile: Option<PathBuf>,
    /// Program run at DHCP events.
    pub script: PathBuf,
    /// Solicit/Request attempts before giving up; 0 retries forever.
    pub discover_retries: u32,
    /// Pause between retransmissions.
    pub discover_timeout: Duration,
    /// Pause after a failed negotiation.
    pub tryagain_timeout: Duration,
    /// Exit with status 1 if no lease is obtained.
    pub exit_if_no_lease: bool,
    /// Exit after the first lease.
    pub quit_after_lease: bool,
    /// Send a Release before exiting.
    pub release_on_quit: bool,
    pub client_port: u16,
    pub server_port: u16,
    /// Multicast Renew instead of unicasting it to the server.
    pub multicast_renew: bool,
    /// Send Information-Request instead of Solicit.
    pub stateless: bool,
    /// Ask for an address (IA_NA).
    pub request_address: bool,
    /// Address hint placed in the IA_NA of a Solicit.
    pub requested_addr: Option<Ipv6Addr>,
    /// Ask for a delegated prefix (IA_PD).
    pub request_prefix: bool,
    pub requested_options: RequestedOptions,
    /// `-x` options, ordered by code.
    pub extra_options: Vec<ExtraOption>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            pidfile: None,
            script: PathBuf::from(DEFAULT_SCRIPT),
            discover_retries: 3,
            discover_timeout: Duration::from_secs(3),
            tryagain_timeout: Duration::from_secs(20),
            exit_if_no_lease: false,
            quit_after_lease: false,
            release_on_quit: false,
            client_port: DHCP6_CLIENT_PORT,
            server_port: DHCP6_SERVER_PORT,
            multicast_renew: false,
            stateless: false,
            request_address: true,
            requested_addr: None,
            request_prefix: false,
            requested_options: RequestedOptions::with_defaults(),
            extra_options: Vec::new(),
        }
    }
}

impl Config {
    /// Apply a `-r` argument: an address to request, or `no` for none.
    pub fn set_requested_address(&mut self, arg: &str) -> Result<(), ConfigError> {
        if arg == "no" {
            self.request_address = false;
            self.requested_addr = None;
            return Ok(());
        }
        let addr = arg
            .parse()
            .map_err(|_| ConfigError::BadAddress(arg.to_string()))?;
        self.request_address = true;
        self.requested_addr = Some(addr);
        Ok(())
    }

    /// Switch to Information-Request only; no address is asked for.
    pub fn set_stateless(&mut self) {
        self.stateless = true;
        self.request_address = false;
        self.requested_addr = None;
    }

    /// Use `port` as the client port and the next one as the server port.
    pub fn set_client_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let server_port = port.checked_add(1).ok_or(ConfigError::BadPort(port))?;
        self.client_port = port;
        self.server_port = server_port;
        Ok(())
    }

    /// Rebuild the requested option mask from `-O` arguments.
    pub fn set_requested_options<'a, I>(&mut self, args: I, defaults: bool) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut mask = if defaults {
            RequestedOptions::with_defaults()
        } else {
            RequestedOptions::new()
        };
        for arg in args {
            mask.set(parse_request_option(arg)?);
        }
        self.requested_options = mask;
        Ok(())
    }

    /// Add a `-x` option.
    pub fn add_extra_option(&mut self, arg: &str) -> Result<(), ConfigError> {
        let opt = parse_extra_option(arg)?;
        insert_extra(&mut self.extra_options, opt);
        Ok(())
    }
}
