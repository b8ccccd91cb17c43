//! Named networks and the registry that owns them.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use corral_common::config::CorralConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, PortMapping};
use corral_core::command::{CommandRunner, HostRunner};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::bridge::NetworkDriver;
use crate::endpoint::{Endpoint, NetnsSwitch, ThreadNetns};
use crate::firewall::{Firewall, RuleAction};
use crate::ipam::Ipam;

/// Longest usable interface name (`IFNAMSIZ - 1`).
const MAX_NAME_LEN: usize = 15;

/// A named network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network name, also the name of its bridge link.
    pub name: String,
    /// Gateway address with the subnet prefix, e.g. `192.168.10.1/24`.
    pub ip_range: Ipv4Network,
    /// Driver managing the network.
    pub driver: NetworkDriver,
}

impl Network {
    /// Gateway address, assigned to the bridge.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// Subnet in canonical form, e.g. `192.168.10.0/24`.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix()).unwrap_or(self.ip_range)
    }
}

/// The networks known on this host, loaded from the network store.
///
/// Generic over the command runner and namespace switch so the
/// orchestration can be exercised without touching the host.
#[derive(Debug)]
pub struct NetworkRegistry<R = HostRunner, S = ThreadNetns> {
    dir: PathBuf,
    ipam: Ipam,
    runner: R,
    netns: S,
    networks: BTreeMap<String, Network>,
}

impl NetworkRegistry {
    /// Opens the registry configured for this host.
    ///
    /// # Errors
    ///
    /// See [`NetworkRegistry::init`].
    pub fn open(config: &CorralConfig) -> Result<Self> {
        Self::init(&config.network_dir, Ipam::new(&config.ipam_file), HostRunner, ThreadNetns)
    }
}

impl<R: CommandRunner, S: NetnsSwitch> NetworkRegistry<R, S> {
    /// Accepts forwarded traffic, ensures the store directory, and loads
    /// every network file in it.
    ///
    /// Files that cannot be parsed are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if `iptables` fails or the store cannot be read.
    pub fn init(dir: &Path, ipam: Ipam, runner: R, netns: S) -> Result<Self> {
        Firewall::new(&runner).accept_forwarding()?;
        std::fs::create_dir_all(dir).map_err(|e| CorralError::io(dir, e))?;

        let mut networks = BTreeMap::new();
        let entries = std::fs::read_dir(dir).map_err(|e| CorralError::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| CorralError::io(dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match load_network(&path) {
                Ok(network) => {
                    let _ = networks.insert(network.name.clone(), network);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable network file"),
            }
        }
        tracing::debug!(count = networks.len(), dir = %dir.display(), "network registry loaded");

        Ok(Self {
            dir: dir.to_path_buf(),
            ipam,
            runner,
            netns,
            networks,
        })
    }

    /// The command runner, for inspection.
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// The address allocator.
    pub const fn ipam(&self) -> &Ipam {
        &self.ipam
    }

    /// Looks up a network by name.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown name.
    pub fn get(&self, name: &str) -> Result<&Network> {
        self.networks.get(name).ok_or_else(|| CorralError::NotFound {
            kind: "network",
            id: name.to_string(),
        })
    }

    /// All networks, ordered by name.
    pub fn list(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    /// Creates network `name` over `subnet`.
    ///
    /// The gateway is the first address allocated from the subnet. If the
    /// driver fails, the gateway is released again.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid or duplicate name, or
    /// the allocator, driver, or persistence error.
    pub fn create(&mut self, name: &str, driver: NetworkDriver, subnet: Ipv4Network) -> Result<&Network> {
        validate_name(name)?;
        if self.networks.contains_key(name) {
            return Err(CorralError::config(format!("network {name} already exists")));
        }

        let gateway = self.ipam.allocate(subnet)?;
        let ip_range = Ipv4Network::new(gateway, subnet.prefix())
            .map_err(|e| CorralError::config(format!("invalid subnet {subnet}: {e}")))?;
        let network = Network {
            name: name.to_string(),
            ip_range,
            driver,
        };

        let created = driver
            .create(&self.runner, name, ip_range)
            .and_then(|()| self.persist(&network));
        if let Err(e) = created {
            if let Err(release) = self.ipam.release(subnet, gateway) {
                tracing::warn!(network = name, error = %release, "gateway release failed");
            }
            return Err(e);
        }

        tracing::info!(network = name, %ip_range, %driver, "network created");
        Ok(self.networks.entry(name.to_string()).or_insert(network))
    }

    /// Removes network `name`: deletes its link and its file, then
    /// releases its gateway.
    ///
    /// The gateway stays reserved until the link is gone, so a failed
    /// removal leaves the network intact and its addresses consistent.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown name, or the first
    /// driver, filesystem, or allocator error.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let network = self.get(name)?.clone();
        network.driver.delete(&self.runner, &network)?;

        let file = self.file_for(name);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CorralError::io(file, e)),
        }
        let _ = self.networks.remove(name);
        self.ipam.release(network.subnet(), network.gateway())?;
        tracing::info!(network = name, "network removed");
        Ok(())
    }

    /// Connects the container whose init process is `pid` to network
    /// `name` and forwards `port_mappings` to it.
    ///
    /// On failure the forwarding rules added so far are deleted, the veth
    /// pair is deleted, and the address is released.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown network, or the
    /// allocator, driver, namespace, or firewall error.
    pub fn connect(
        &self,
        name: &str,
        container: &ContainerId,
        pid: u32,
        port_mappings: &[PortMapping],
    ) -> Result<Endpoint> {
        let network = self.get(name)?;
        let ip = self.ipam.allocate(network.subnet())?;
        let mut endpoint = Endpoint::new(container, name, ip, port_mappings.to_vec());

        let firewall = Firewall::new(&self.runner);
        let mut forwarded = 0;
        let attached = network
            .driver
            .connect(&self.runner, network, &endpoint)
            .and_then(|()| endpoint.configure(&self.runner, &self.netns, network, pid))
            .and_then(|()| {
                for mapping in port_mappings {
                    firewall.port_mappings(RuleAction::Append, std::slice::from_ref(mapping), ip)?;
                    forwarded += 1;
                }
                Ok(())
            });
        if let Err(e) = attached {
            tracing::error!(network = name, container = %container, error = %e, "connect failed, rolling back");
            if let Err(cleanup) = firewall.port_mappings(RuleAction::Delete, &port_mappings[..forwarded], ip) {
                tracing::warn!(%ip, error = %cleanup, "port mapping removal failed");
            }
            if let Err(cleanup) = self.runner.call("ip", &["link", "del", &endpoint.host_veth]) {
                tracing::debug!(error = %cleanup, "veth already gone");
            }
            if let Err(release) = self.ipam.release(network.subnet(), ip) {
                tracing::warn!(%ip, error = %release, "address release failed");
            }
            return Err(e);
        }

        tracing::info!(network = name, container = %container, %ip, "container connected");
        Ok(endpoint)
    }

    /// Disconnects an endpoint. See [`NetworkDriver::disconnect`].
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown network.
    pub fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        let network = self.get(&endpoint.network)?;
        network.driver.disconnect(network, endpoint)
    }

    /// Returns a removed container's address to the pool and drops its
    /// port forwarding rules.
    ///
    /// Rules that are already gone are only logged.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown network, or the
    /// allocator error.
    pub fn release(&self, name: &str, ip: Ipv4Addr, port_mappings: &[PortMapping]) -> Result<()> {
        let network = self.get(name)?;
        if let Err(e) = Firewall::new(&self.runner).port_mappings(RuleAction::Delete, port_mappings, ip) {
            tracing::warn!(network = name, %ip, error = %e, "port mapping removal failed");
        }
        self.ipam.release(network.subnet(), ip)
    }

    fn file_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn persist(&self, network: &Network) -> Result<()> {
        let file = self.file_for(&network.name);
        let json = serde_json::to_string_pretty(network)?;
        std::fs::write(&file, json).map_err(|e| CorralError::io(file, e))
    }
}

fn load_network(path: &Path) -> Result<Network> {
    let content = std::fs::read_to_string(path).map_err(|e| CorralError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CorralError::config(format!(
            "network name {name:?} must be 1-{MAX_NAME_LEN} characters of [A-Za-z0-9._-]"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::command::RecordingRunner;

    /// Stays in the current namespace.
    struct NoSwitch;

    impl NetnsSwitch for NoSwitch {
        type Guard = ();

        fn enter(&self, _pid: u32) -> Result<()> {
            Ok(())
        }
    }

    fn registry(dir: &Path, runner: RecordingRunner) -> NetworkRegistry<RecordingRunner, NoSwitch> {
        NetworkRegistry::init(
            &dir.join("network"),
            Ipam::new(dir.join("ipam").join("subnet.json")),
            runner,
            NoSwitch,
        )
        .expect("init")
    }

    fn subnet(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn init_accepts_forwarding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(dir.path(), RecordingRunner::new());
        assert_eq!(reg.runner().calls(), vec!["iptables -P FORWARD ACCEPT"]);
        assert_eq!(reg.list().count(), 0);
    }

    #[test]
    fn gateway_is_first_address_and_containers_follow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::new());

        let net = reg
            .create("br0", NetworkDriver::Bridge, subnet("192.168.10.0/24"))
            .unwrap()
            .clone();
        assert_eq!(net.gateway(), Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(net.ip_range.to_string(), "192.168.10.1/24");

        let id = ContainerId::new("3f2a9c1d7e4b");
        let ep = reg.connect("br0", &id, 4242, &[]).unwrap();
        assert_eq!(ep.ip, Ipv4Addr::new(192, 168, 10, 2));

        reg.release("br0", ep.ip, &[]).unwrap();
        let again = reg.connect("br0", &id, 4242, &[]).unwrap();
        assert_eq!(again.ip, Ipv4Addr::new(192, 168, 10, 2));
    }

    #[test]
    fn network_file_uses_camel_case_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::new());
        reg.create("br0", NetworkDriver::Bridge, subnet("10.10.0.0/24")).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("network").join("br0.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["name"], "br0");
        assert_eq!(value["ipRange"], "10.10.0.1/24");
        assert_eq!(value["driver"], "bridge");
    }

    #[test]
    fn connect_runs_host_then_namespace_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::new());
        reg.create("br0", NetworkDriver::Bridge, subnet("192.168.10.0/24")).unwrap();
        let before = reg.runner().calls().len();

        let mappings = ["8080:80".parse().unwrap()];
        let ep = reg
            .connect("br0", &ContainerId::new("3f2a9c1d7e4b"), 4242, &mappings)
            .unwrap();

        assert_eq!(ep.container_veth, "cif-3f2a9");
        assert_eq!(
            reg.runner().calls()[before..],
            [
                "ip link add 3f2a9 type veth peer name cif-3f2a9",
                "ip link set 3f2a9 master br0",
                "ip link set 3f2a9 up",
                "ip link set cif-3f2a9 netns 4242",
                "ip addr add 192.168.10.2/24 dev cif-3f2a9",
                "ip link set cif-3f2a9 up",
                "ip link set lo up",
                "ip route add default via 192.168.10.1 dev cif-3f2a9",
                "ip -o link show cif-3f2a9",
                "iptables -t nat -A PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.10.2:80",
            ]
        );
    }

    #[test]
    fn failed_connect_releases_address_and_veth() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::failing_on("DNAT"));
        reg.create("br0", NetworkDriver::Bridge, subnet("192.168.10.0/24")).unwrap();

        let mappings = ["8080:80".parse().unwrap()];
        let err = reg
            .connect("br0", &ContainerId::new("3f2a9c1d7e4b"), 4242, &mappings)
            .unwrap_err();
        assert_eq!(err.exit_code(), 7);
        assert_eq!(
            reg.runner().calls().last().map(String::as_str),
            Some("ip link del 3f2a9")
        );
        // .2 is free again.
        assert_eq!(
            reg.ipam().allocate(subnet("192.168.10.0/24")).unwrap(),
            Ipv4Addr::new(192, 168, 10, 2)
        );
    }

    #[test]
    fn failed_connect_drops_forwarding_rules_already_added() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::failing_on("--dport 8443"));
        reg.create("br0", NetworkDriver::Bridge, subnet("192.168.10.0/24")).unwrap();

        let mappings = ["8080:80".parse().unwrap(), "8443:443".parse().unwrap()];
        assert!(reg
            .connect("br0", &ContainerId::new("3f2a9c1d7e4b"), 4242, &mappings)
            .is_err());

        let calls = reg.runner().calls();
        let position = |line: &str| calls.iter().position(|c| c == line);
        let dropped = position(
            "iptables -t nat -D PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.10.2:80",
        )
        .expect("8080 rule deleted");
        let unlinked = position("ip link del 3f2a9").expect("veth deleted");
        assert!(dropped < unlinked);
        assert!(!calls.iter().any(|c| c.contains("-D PREROUTING") && c.contains("8443")));
    }

    #[test]
    fn failed_create_returns_gateway() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::failing_on("type bridge"));
        assert!(reg.create("br0", NetworkDriver::Bridge, subnet("10.5.0.0/24")).is_err());
        assert!(reg.get("br0").is_err());
        assert!(!dir.path().join("network").join("br0.json").exists());
        assert_eq!(
            reg.ipam().allocate(subnet("10.5.0.0/24")).unwrap(),
            Ipv4Addr::new(10, 5, 0, 1)
        );
    }

    #[test]
    fn duplicate_and_invalid_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::new());
        reg.create("br0", NetworkDriver::Bridge, subnet("10.6.0.0/24")).unwrap();
        for name in ["br0", "", "a/b", "much-too-long-bridge-name"] {
            assert!(
                matches!(
                    reg.create(name, NetworkDriver::Bridge, subnet("10.7.0.0/24")),
                    Err(CorralError::Config { .. })
                ),
                "{name:?}"
            );
        }
    }

    #[test]
    fn remove_deletes_link_rule_and_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::new());
        reg.create("br0", NetworkDriver::Bridge, subnet("192.168.10.0/24")).unwrap();

        reg.remove("br0").unwrap();
        let calls = reg.runner().calls();
        assert!(calls.contains(&"ip link del br0".to_string()));
        assert!(calls.contains(
            &"iptables -t nat -D POSTROUTING -s 192.168.10.0/24 ! -o br0 -j MASQUERADE".to_string()
        ));
        assert!(!dir.path().join("network").join("br0.json").exists());
        assert!(matches!(reg.remove("br0"), Err(CorralError::NotFound { .. })));
    }

    #[test]
    fn disconnect_then_release_only_drops_forwarding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::new());
        reg.create("br0", NetworkDriver::Bridge, subnet("192.168.10.0/24")).unwrap();
        let mappings = vec!["8080:80".parse().unwrap()];
        let id = ContainerId::new("3f2a9c1d7e4b");
        let ep = reg.connect("br0", &id, 4242, &mappings).unwrap();
        let before = reg.runner().calls().len();

        reg.disconnect(&Endpoint::new(&id, "br0", ep.ip, mappings.clone())).unwrap();
        assert_eq!(reg.runner().calls().len(), before);

        reg.release("br0", ep.ip, &mappings).unwrap();
        assert_eq!(
            reg.runner().calls()[before..],
            ["iptables -t nat -D PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.10.2:80"]
        );
    }

    #[test]
    fn failed_remove_keeps_network_and_gateway() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reg = registry(dir.path(), RecordingRunner::failing_on("link del br0"));
        reg.create("br0", NetworkDriver::Bridge, subnet("192.168.10.0/24")).unwrap();

        assert!(reg.remove("br0").is_err());
        assert!(reg.get("br0").is_ok());
        assert!(dir.path().join("network").join("br0.json").exists());

        let ep = reg
            .connect("br0", &ContainerId::new("3f2a9c1d7e4b"), 4242, &[])
            .unwrap();
        assert_eq!(ep.ip, Ipv4Addr::new(192, 168, 10, 2));
    }

    #[test]
    fn unknown_network_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(dir.path(), RecordingRunner::new());
        let err = reg
            .connect("nope", &ContainerId::new("abc"), 1, &[])
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
