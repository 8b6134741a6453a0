//! DHCPv6 wire format.

pub mod codec;
pub mod domain;
pub mod options;
pub mod packet;
