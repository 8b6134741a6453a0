//! Event loop binding signals, the listening socket and the armed timeout
//! to the state machine.

use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::client::{Client, ClientSignal, Flow};
use crate::config::Config;
use crate::context::ClientContext;
use crate::error::Result;
use crate::network::{Interface, LinkTransport, Received};
use crate::script::ExternalScript;
use crate::signals::Signals;

enum Event {
    Signal(ClientSignal),
    Packet(std::io::Result<Option<Received>>),
    Timeout,
}

/// Run the client until it stops. Returns the process exit status.
pub async fn run(config: Config) -> Result<i32> {
    let iface = Interface::read(&config.interface)?;
    info!(
        "DHCPv6: Using {} (index {}, link-local {})",
        iface.name, iface.index, iface.link_local
    );

    let mut signals = Signals::new()?;
    let transport = LinkTransport::new(config.client_port, config.server_port);
    let scripts = ExternalScript::new(&config.script);
    let discover_timeout = config.discover_timeout;

    let ctx = ClientContext::new(config, iface);
    let mut client = Client::new(ctx, transport, scripts);
    client.start();

    loop {
        let flow = match client.timeout() {
            Some(t) if t.is_zero() => client.on_timeout()?,
            timeout => {
                debug!("DHCPv6: Waiting {:?}", timeout);
                let started = Instant::now();
                let event = tokio::select! {
                    biased;
                    sig = signals.recv() => Event::Signal(sig),
                    res = client.transport_mut().recv() => Event::Packet(res),
                    _ = wait(timeout) => Event::Timeout,
                };
                client.elapse(started.elapsed());

                match event {
                    Event::Signal(sig) => client.on_signal(sig)?,
                    Event::Packet(Ok(Some(packet))) => client.on_packet(&packet)?,
                    Event::Packet(Ok(None)) => Flow::Continue,
                    Event::Packet(Err(e)) => {
                        error!("DHCPv6: Read error: {}, reopening socket", e);
                        let started = Instant::now();
                        tokio::time::sleep(discover_timeout).await;
                        client.elapse(started.elapsed());
                        let iface = client.context().iface.clone();
                        client.transport_mut().reopen(&iface)?;
                        Flow::Continue
                    }
                    Event::Timeout => client.on_timeout()?,
                }
            }
        };

        match flow {
            Flow::Continue => {}
            Flow::Stop => {
                client.release_on_quit()?;
                return Ok(0);
            }
            Flow::Fail => return Ok(1),
        }
    }
}

/// Sleep for `timeout`, or forever when there is none.
async fn wait(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}
