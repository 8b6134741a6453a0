//! Signal delivery into the event loop.

use std::io;

use log::debug;
use tokio::signal::unix::{Signal, SignalKind, signal};

use crate::client::ClientSignal;

/// SIGUSR1, SIGUSR2 and SIGTERM as one stream of [`ClientSignal`]s.
pub struct Signals {
    usr1: Signal,
    usr2: Signal,
    term: Signal,
}

impl Signals {
    /// Register the handlers. Must be called from within a tokio runtime.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            usr1: signal(SignalKind::user_defined1())?,
            usr2: signal(SignalKind::user_defined2())?,
            term: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> ClientSignal {
        let sig = tokio::select! {
            Some(()) = self.term.recv() => ClientSignal::Terminate,
            Some(()) = self.usr1.recv() => ClientSignal::Renew,
            Some(()) = self.usr2.recv() => ClientSignal::Release,
            else => ClientSignal::Terminate,
        };
        debug!("Received signal {:?}", sig);
        sig
    }
}
