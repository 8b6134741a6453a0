//! mvirt-dhcp6 - DHCPv6 client daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use mvirt_dhcp6::Config;
use mvirt_dhcp6::config::{DEFAULT_INTERFACE, DEFAULT_SCRIPT, DHCP6_CLIENT_PORT};
use mvirt_dhcp6::pidfile::PidFile;
use mvirt_dhcp6::runner;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// DHCPv6 client.
#[derive(Parser)]
#[command(name = "mvirt-dhcp6")]
#[command(version = VERSION)]
#[command(about = "DHCPv6 client for address and prefix leases")]
struct Args {
    /// Interface to use
    #[arg(short, long, default_value = DEFAULT_INTERFACE)]
    interface: String,

    /// Create pidfile
    #[arg(short, long)]
    pidfile: Option<PathBuf>,

    /// Run PROG at DHCP events
    #[arg(short, long, value_name = "PROG", default_value = DEFAULT_SCRIPT)]
    script: PathBuf,

    /// Send up to N discover packets (0 = unlimited)
    #[arg(short = 't', long, value_name = "N", default_value_t = 3)]
    retries: u32,

    /// Pause between packets
    #[arg(short = 'T', long, value_name = "SEC", default_value_t = 3)]
    timeout: u64,

    /// Wait if lease is not obtained
    #[arg(short = 'A', long, value_name = "SEC", default_value_t = 20)]
    tryagain: u64,

    /// Exit with status 1 if lease is not obtained
    #[arg(short, long)]
    now: bool,

    /// Exit after obtaining lease
    #[arg(short, long)]
    quit: bool,

    /// Release lease on exit
    #[arg(short = 'R', long)]
    release: bool,

    /// Use PORT as client port (server port is PORT+1)
    #[arg(short = 'P', long, value_name = "PORT", default_value_t = DHCP6_CLIENT_PORT)]
    client_port: u16,

    /// Multicast renew requests rather than unicast
    #[arg(short, long)]
    multicast_renew: bool,

    /// Send Information-Request instead of Solicit
    #[arg(short = 'l', long)]
    stateless: bool,

    /// Request this IPv6 address, or "no" to request none
    #[arg(short, long, value_name = "IPv6|no")]
    request: Option<String>,

    /// Request prefix
    #[arg(short = 'd', long)]
    requestprefix: bool,

    /// Don't request any options (unless -O is given)
    #[arg(short = 'o', long)]
    no_default_options: bool,

    /// Request option OPT from server (cumulative)
    #[arg(short = 'O', long = "request-option", value_name = "OPT")]
    request_options: Vec<String>,

    /// Include option OPT in sent packets (cumulative)
    #[arg(short = 'x', long = "option", value_name = "OPT:VAL")]
    options: Vec<String>,

    /// Verbose (repeat for more)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = Config {
            interface: self.interface,
            pidfile: self.pidfile,
            script: self.script,
            discover_retries: self.retries,
            discover_timeout: Duration::from_secs(self.timeout),
            tryagain_timeout: Duration::from_secs(self.tryagain),
            exit_if_no_lease: self.now,
            quit_after_lease: self.quit,
            release_on_quit: self.release,
            multicast_renew: self.multicast_renew,
            request_prefix: self.requestprefix,
            ..Config::default()
        };
        config.set_client_port(self.client_port)?;

        if let Some(request) = &self.request {
            config.set_requested_address(request)?;
        }
        if self.stateless {
            config.set_stateless();
        }
        if self.no_default_options || !self.request_options.is_empty() {
            config.set_requested_options(
                self.request_options.iter().map(String::as_str),
                !self.no_default_options,
            )?;
        }
        for opt in &self.options {
            config.add_extra_option(opt)?;
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    info!("mvirt-dhcp6 v{} starting", VERSION);

    let config = args.into_config().context("Invalid configuration")?;

    let _pidfile = match &config.pidfile {
        Some(path) => Some(
            PidFile::create(path)
                .with_context(|| format!("Failed to create pidfile {}", path.display()))?,
        ),
        None => None,
    };

    match runner::run(config).await {
        Ok(status) => {
            info!("mvirt-dhcp6 exiting with status {}", status);
            Ok(ExitCode::from(status as u8))
        }
        Err(e) => {
            error!("DHCPv6: {}", e);
            Err(e.into())
        }
    }
}
