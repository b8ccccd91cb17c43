//! The bridge network driver.
//!
//! A network is a Linux bridge carrying the gateway address. Containers
//! attach through a veth pair whose host end is enslaved to the bridge.

use std::fmt;
use std::str::FromStr;

use corral_common::constants::BRIDGE_DRIVER;
use corral_common::error::{CorralError, Result};
use corral_core::command::CommandRunner;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::firewall::{Firewall, RuleAction};
use crate::network::Network;

/// Supported network drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDriver {
    /// Linux bridge with masquerade.
    Bridge,
}

impl NetworkDriver {
    /// Driver name as stored and accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bridge => BRIDGE_DRIVER,
        }
    }

    /// Creates the link for network `name`, assigns it `gateway` (the
    /// gateway address with the subnet prefix), and enables NAT.
    ///
    /// A half-created bridge is deleted again before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if any `ip` or `iptables` invocation fails.
    pub fn create<R: CommandRunner>(self, runner: &R, name: &str, gateway: Ipv4Network) -> Result<()> {
        match self {
            Self::Bridge => {
                runner.call("ip", &["link", "add", name, "type", "bridge"])?;
                let configured = configure_bridge(runner, name, gateway);
                if let Err(e) = configured {
                    if let Err(cleanup) = runner.call("ip", &["link", "del", name]) {
                        tracing::warn!(bridge = name, error = %cleanup, "bridge cleanup failed");
                    }
                    return Err(e);
                }
                tracing::info!(bridge = name, %gateway, "bridge created");
                Ok(())
            }
        }
    }

    /// Deletes the link of `network` and its masquerade rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be deleted. A missing masquerade
    /// rule is only logged.
    pub fn delete<R: CommandRunner>(self, runner: &R, network: &Network) -> Result<()> {
        match self {
            Self::Bridge => {
                runner.call("ip", &["link", "del", &network.name])?;
                if let Err(e) = Firewall::new(runner).masquerade(RuleAction::Delete, network.subnet(), &network.name) {
                    tracing::warn!(bridge = %network.name, error = %e, "masquerade rule removal failed");
                }
                tracing::info!(bridge = %network.name, "bridge deleted");
                Ok(())
            }
        }
    }

    /// Creates the veth pair of `endpoint` and attaches its host end.
    ///
    /// # Errors
    ///
    /// Returns an error if any `ip` invocation fails.
    pub fn connect<R: CommandRunner>(self, runner: &R, network: &Network, endpoint: &Endpoint) -> Result<()> {
        match self {
            Self::Bridge => {
                let host = endpoint.host_veth.as_str();
                runner.call(
                    "ip",
                    &["link", "add", host, "type", "veth", "peer", "name", &endpoint.container_veth],
                )?;
                runner.call("ip", &["link", "set", host, "master", &network.name])?;
                runner.call("ip", &["link", "set", host, "up"])?;
                tracing::debug!(bridge = %network.name, veth = host, "veth attached");
                Ok(())
            }
        }
    }

    /// Detaches an endpoint. The veth pair disappears with the container's
    /// network namespace, so there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub const fn disconnect(self, _network: &Network, _endpoint: &Endpoint) -> Result<()> {
        Ok(())
    }
}

fn configure_bridge<R: CommandRunner>(runner: &R, name: &str, gateway: Ipv4Network) -> Result<()> {
    runner.call("ip", &["addr", "add", &gateway.to_string(), "dev", name])?;
    runner.call("ip", &["link", "set", name, "up"])?;
    let subnet = Ipv4Network::new(gateway.network(), gateway.prefix()).unwrap_or(gateway);
    Firewall::new(runner).masquerade(RuleAction::Append, subnet, name)
}

impl fmt::Display for NetworkDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NetworkDriver {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            BRIDGE_DRIVER => Ok(Self::Bridge),
            other => Err(CorralError::config(format!("unsupported network driver {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::command::RecordingRunner;

    #[test]
    fn driver_names_round_trip() {
        assert_eq!("bridge".parse::<NetworkDriver>().unwrap(), NetworkDriver::Bridge);
        assert_eq!(NetworkDriver::Bridge.to_string(), "bridge");
        assert!(matches!(
            "overlay".parse::<NetworkDriver>(),
            Err(CorralError::Config { .. })
        ));
    }

    #[test]
    fn create_issues_link_address_and_nat() {
        let runner = RecordingRunner::new();
        NetworkDriver::Bridge
            .create(&runner, "br0", "192.168.10.1/24".parse().unwrap())
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "ip link add br0 type bridge",
                "ip addr add 192.168.10.1/24 dev br0",
                "ip link set br0 up",
                "iptables -t nat -A POSTROUTING -s 192.168.10.0/24 ! -o br0 -j MASQUERADE",
            ]
        );
    }

    #[test]
    fn failed_create_removes_the_link() {
        let runner = RecordingRunner::failing_on("addr add");
        let result = NetworkDriver::Bridge.create(&runner, "br0", "10.1.0.1/24".parse().unwrap());
        assert!(result.is_err());
        assert_eq!(runner.calls().last().map(String::as_str), Some("ip link del br0"));
    }
}
