//! Bridge to the external configuration script.
//!
//! The script is called as `<script> <event>` with the decoded lease data
//! in its environment. It runs to completion before the client continues.

use std::path::PathBuf;
use std::process::Command;

use log::{debug, trace, warn};

use crate::dhcp6::codec::decode_to_env;

/// Events passed to the script as its first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEvent {
    /// Interface should be brought to a state without a lease.
    Deconfig,
    /// A lease was obtained.
    Bound,
    /// An existing lease was extended.
    Renew,
    /// Server answered with a failure status.
    Nak,
    /// No lease could be obtained.
    Leasefail,
}

impl ScriptEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptEvent::Deconfig => "deconfig",
            ScriptEvent::Bound => "bound",
            ScriptEvent::Renew => "renew",
            ScriptEvent::Nak => "nak",
            ScriptEvent::Leasefail => "leasefail",
        }
    }
}

impl std::fmt::Display for ScriptEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the configuration script. Implementations block until it exits.
pub trait ScriptRunner {
    /// `env` holds `name=value` entries.
    fn run(&mut self, event: ScriptEvent, env: &[String]);
}

/// Environment for a script run: the interface name followed by every
/// option decoded from `options`.
pub fn build_env(interface: &str, options: Option<&[u8]>) -> Vec<String> {
    let mut env = vec![format!("interface={}", interface)];
    if let Some(options) = options {
        env.extend(decode_to_env(options));
    }
    env
}

/// Runs an external program.
#[derive(Debug, Clone)]
pub struct ExternalScript {
    path: PathBuf,
}

impl ExternalScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScriptRunner for ExternalScript {
    fn run(&mut self, event: ScriptEvent, env: &[String]) {
        debug!("Executing {} {}", self.path.display(), event);

        let mut cmd = Command::new(&self.path);
        cmd.arg(event.as_str());
        for entry in env {
            trace!(" {}", entry);
            if let Some((name, value)) = entry.split_once('=') {
                cmd.env(name, value);
            }
        }

        // Exit status is not inspected.
        if let Err(e) = cmd.status() {
            warn!("Failed to run {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp6::codec::OptionBuf;
    use crate::dhcp6::options::code;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_event_names() {
        let names: Vec<_> = [
            ScriptEvent::Deconfig,
            ScriptEvent::Bound,
            ScriptEvent::Renew,
            ScriptEvent::Nak,
            ScriptEvent::Leasefail,
        ]
        .iter()
        .map(|e| e.as_str())
        .collect();
        assert_eq!(names, ["deconfig", "bound", "renew", "nak", "leasefail"]);
    }

    #[test]
    fn test_build_env_without_options() {
        assert_eq!(build_env("eth1", None), vec!["interface=eth1"]);
    }

    #[test]
    fn test_build_env_with_options() {
        let opts = OptionBuf::new(code::PXE_CONF_FILE, b"pxe.cfg");
        let env = build_env("eth0", Some(opts.as_bytes()));
        assert_eq!(env, vec!["interface=eth0", "pxeconffile=pxe.cfg"]);
    }

    #[test]
    fn test_external_script_receives_event_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let script = dir.path().join("script.sh");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1 $interface $lease\" > {}\n", out.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut runner = ExternalScript::new(&script);
        runner.run(
            ScriptEvent::Bound,
            &["interface=eth0".to_string(), "lease=3600".to_string()],
        );

        assert_eq!(fs::read_to_string(&out).unwrap(), "bound eth0 3600\n");
    }

    #[test]
    fn test_missing_script_is_not_fatal() {
        let mut runner = ExternalScript::new("/nonexistent/dhcp6.script");
        runner.run(ScriptEvent::Deconfig, &["interface=eth0".to_string()]);
    }
}
