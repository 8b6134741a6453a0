//! mvirt-dhcp6 - DHCPv6 client for guests and hosts.
//!
//! Obtains an IPv6 address (IA_NA) and/or a delegated prefix (IA_PD) from a
//! DHCPv6 server, keeps the lease renewed, and hands every lease change to
//! an external configuration script.
//!
//! ## Architecture
//!
//! - **Wire format** (`dhcp6`): option codec, domain lists, message builder
//! - **Network** (`network`): interface lookup, raw and kernel transports
//! - **State machine** (`client`): lease lifecycle, driven by events
//! - **Event loop** (`runner`): signals, sockets and timers
//!
//! Everything except the event loop and the real transport works without
//! sockets, so the state machine is tested against mock transports.

pub mod client;
pub mod config;
pub mod context;
pub mod dhcp6;
pub mod error;
pub mod network;
pub mod pidfile;
pub mod runner;
pub mod script;
pub mod signals;

pub use client::{Client, ClientSignal, ClientState, Flow};
pub use config::Config;
pub use context::ClientContext;
pub use error::{Error, Result};
