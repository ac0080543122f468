// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic process identity: `[hostname "-"]? (process-name | "t" time-suffix)`.

use crate::config::Config;

/// Derive this process's routing identity on the snapshot channel.
///
/// Four outcomes, matching `config.hostname_in_identity` and whether
/// `config.process_name` is set:
/// - hostname on, name set: `"<hostname>-<name>"`
/// - hostname on, name unset: `"<hostname>-t<time-suffix>"`
/// - hostname off, name set: `"<name>"`
/// - hostname off, name unset: `"t<time-suffix>"`
pub fn process_identity(config: &Config) -> String {
    let mut out = String::new();
    if config.hostname_in_identity {
        out.push_str(&hostname());
        out.push('-');
    }
    match &config.process_name {
        Some(name) => out.push_str(name),
        None => out.push_str(&time_suffix()),
    }
    out
}

/// No `hostname`-lookup crate appears anywhere in the reference stack, so
/// this sticks to what the standard library and `/etc/hostname` offer
/// rather than pulling one in for a single syscall.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// A `"t" + time-based suffix` unique enough to stand in for a process name,
/// built from wall-clock time since the epoch rather than `chrono`'s
/// local-time formatting (no `chrono` dependency elsewhere in this repo).
fn time_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("t{:06}{:06}", since_epoch.as_secs() % 1_000_000, since_epoch.subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hostname_in_identity: bool, process_name: Option<&str>) -> Config {
        Config {
            bind_address: "127.0.0.1".to_string(),
            broker_address: "127.0.0.1".to_string(),
            serialization_method: meru_proto::Backend::Json,
            receive_timeout: std::time::Duration::from_millis(4000),
            hostname_in_identity,
            process_name: process_name.map(str::to_string),
            ssh_tunnel: None,
        }
    }

    #[test]
    fn hostname_and_process_name_both_present() {
        let identity = process_identity(&config(true, Some("worker-1")));
        assert!(identity.ends_with("-worker-1"));
    }

    #[test]
    fn process_name_alone_when_hostname_disabled() {
        let identity = process_identity(&config(false, Some("worker-1")));
        assert_eq!(identity, "worker-1");
    }

    #[test]
    fn time_suffix_fallback_when_process_name_unset() {
        let identity = process_identity(&config(false, None));
        assert!(identity.starts_with('t'));
        assert_eq!(identity.len(), 13);
    }
}
