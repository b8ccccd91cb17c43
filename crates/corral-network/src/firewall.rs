//! `iptables` rules for bridge NAT and port forwarding.

use std::net::Ipv4Addr;

use corral_common::error::Result;
use corral_common::types::PortMapping;
use corral_core::command::CommandRunner;
use ipnetwork::Ipv4Network;

const IPTABLES: &str = "iptables";

/// Whether a rule is appended or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// `-A`
    Append,
    /// `-D`
    Delete,
}

impl RuleAction {
    const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Delete => "-D",
        }
    }
}

/// Source NAT for traffic leaving the bridge subnet through any other
/// interface.
#[must_use]
pub fn masquerade_args(action: RuleAction, subnet: Ipv4Network, bridge: &str) -> Vec<String> {
    [
        "-t",
        "nat",
        action.flag(),
        "POSTROUTING",
        "-s",
        subnet.to_string().as_str(),
        "!",
        "-o",
        bridge,
        "-j",
        "MASQUERADE",
    ]
    .map(str::to_string)
    .to_vec()
}

/// Destination NAT forwarding a host TCP port to a container address.
#[must_use]
pub fn dnat_args(action: RuleAction, mapping: PortMapping, ip: Ipv4Addr) -> Vec<String> {
    [
        "-t",
        "nat",
        action.flag(),
        "PREROUTING",
        "-p",
        "tcp",
        "-m",
        "tcp",
        "--dport",
        mapping.host.to_string().as_str(),
        "-j",
        "DNAT",
        "--to-destination",
        format!("{ip}:{}", mapping.container).as_str(),
    ]
    .map(str::to_string)
    .to_vec()
}

/// Applies rules through a [`CommandRunner`].
#[derive(Debug)]
pub struct Firewall<'r, R: CommandRunner> {
    runner: &'r R,
}

impl<'r, R: CommandRunner> Firewall<'r, R> {
    /// Wraps `runner`.
    pub const fn new(runner: &'r R) -> Self {
        Self { runner }
    }

    fn iptables(&self, args: &[String]) -> Result<()> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner.call(IPTABLES, &args)
    }

    /// Sets the FORWARD chain policy to ACCEPT so bridged traffic passes.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails.
    pub fn accept_forwarding(&self) -> Result<()> {
        self.runner.call(IPTABLES, &["-P", "FORWARD", "ACCEPT"])
    }

    /// Adds or removes the masquerade rule of a bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails.
    pub fn masquerade(&self, action: RuleAction, subnet: Ipv4Network, bridge: &str) -> Result<()> {
        self.iptables(&masquerade_args(action, subnet, bridge))?;
        tracing::debug!(?action, %subnet, bridge, "masquerade rule updated");
        Ok(())
    }

    /// Adds or removes one port forwarding rule per mapping.
    ///
    /// # Errors
    ///
    /// Returns the first `iptables` failure.
    pub fn port_mappings(&self, action: RuleAction, mappings: &[PortMapping], ip: Ipv4Addr) -> Result<()> {
        for mapping in mappings {
            self.iptables(&dnat_args(action, *mapping, ip))?;
            tracing::debug!(?action, %mapping, %ip, "port mapping updated");
        }
        Ok(())
    }
}
