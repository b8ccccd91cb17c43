//! A container's attachment to a network.

use std::net::Ipv4Addr;

use corral_common::constants::CONTAINER_VETH_PREFIX;
use corral_common::error::Result;
use corral_common::types::{ContainerId, PortMapping};
use corral_core::command::CommandRunner;
use corral_core::namespace::NetnsGuard;

use crate::network::Network;

/// Characters of the container id used in veth names.
const VETH_ID_LEN: usize = 5;

/// How the parent reaches into a container's network namespace.
pub trait NetnsSwitch {
    /// Keeps the namespace entered until dropped.
    type Guard;

    /// Enters the network namespace of `pid` on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be entered.
    fn enter(&self, pid: u32) -> Result<Self::Guard>;
}

/// Switches the calling thread with `setns(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadNetns;

impl NetnsSwitch for ThreadNetns {
    type Guard = NetnsGuard;

    fn enter(&self, pid: u32) -> Result<NetnsGuard> {
        NetnsGuard::enter(pid)
    }
}

/// One container's link into one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `{container_id}-{network}`.
    pub id: String,
    /// Name of the network the endpoint belongs to.
    pub network: String,
    /// Host end of the veth pair, enslaved to the bridge.
    pub host_veth: String,
    /// Container end of the veth pair.
    pub container_veth: String,
    /// Address assigned inside the container.
    pub ip: Ipv4Addr,
    /// Hardware address of the container end, once configured.
    pub mac: Option<String>,
    /// Host ports forwarded to the container.
    pub port_mappings: Vec<PortMapping>,
}

impl Endpoint {
    /// Describes the endpoint of `container` on `network`.
    #[must_use]
    pub fn new(container: &ContainerId, network: &str, ip: Ipv4Addr, port_mappings: Vec<PortMapping>) -> Self {
        let short: String = container.as_str().chars().take(VETH_ID_LEN).collect();
        Self {
            id: format!("{container}-{network}"),
            network: network.to_string(),
            host_veth: short.clone(),
            container_veth: format!("{CONTAINER_VETH_PREFIX}{short}"),
            ip,
            mac: None,
            port_mappings,
        }
    }

    /// Moves the container end into the namespace of `pid` and configures
    /// its address, the loopback device, and the default route.
    ///
    /// The original namespace is restored before returning, on success and
    /// on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be entered or any `ip`
    /// invocation fails.
    pub fn configure<R, S>(&mut self, runner: &R, netns: &S, network: &Network, pid: u32) -> Result<()>
    where
        R: CommandRunner,
        S: NetnsSwitch,
    {
        let veth = self.container_veth.as_str();
        runner.call("ip", &["link", "set", veth, "netns", &pid.to_string()])?;

        let _guard = netns.enter(pid)?;
        let cidr = format!("{}/{}", self.ip, network.ip_range.prefix());
        runner.call("ip", &["addr", "add", &cidr, "dev", veth])?;
        runner.call("ip", &["link", "set", veth, "up"])?;
        runner.call("ip", &["link", "set", "lo", "up"])?;
        runner.call(
            "ip",
            &["route", "add", "default", "via", &network.gateway().to_string(), "dev", veth],
        )?;
        let link = runner.run("ip", &["-o", "link", "show", veth])?;
        self.mac = parse_mac(&link);

        tracing::info!(endpoint = %self.id, ip = %self.ip, pid, mac = ?self.mac, "endpoint configured");
        Ok(())
    }
}

/// Extracts the address following `link/ether` in `ip -o link show` output.
fn parse_mac(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    words.find(|w| *w == "link/ether")?;
    words.next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veth_names_use_id_prefix() {
        let ep = Endpoint::new(&ContainerId::new("3f2a9c1d7e4b"), "br0", Ipv4Addr::new(10, 0, 0, 2), vec![]);
        assert_eq!(ep.id, "3f2a9c1d7e4b-br0");
        assert_eq!(ep.host_veth, "3f2a9");
        assert_eq!(ep.container_veth, "cif-3f2a9");
    }

    #[test]
    fn mac_is_read_from_link_output() {
        let out = "7: cif-3f2a9@if8: <BROADCAST,MULTICAST,UP> mtu 1500 qdisc noqueue state UP \\    link/ether 6a:1f:0c:55:aa:01 brd ff:ff:ff:ff:ff:ff link-netnsid 0";
        assert_eq!(parse_mac(out).as_deref(), Some("6a:1f:0c:55:aa:01"));
        assert_eq!(parse_mac(""), None);
    }
}
