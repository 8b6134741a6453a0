//! Interface lookup and packet transport.

pub mod frame;
pub mod interface;
pub mod transport;

pub use interface::Interface;
pub use transport::{LinkTransport, ListenMode, Received, Transport};
