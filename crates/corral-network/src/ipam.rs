//! IP address management backed by a bitmap per subnet.
//!
//! The state file maps each subnet to a string with one character per
//! address slot, `'0'` free and `'1'` allocated:
//!
//! ```json
//! { "192.168.10.0/24": "110000...0" }
//! ```
//!
//! Slot `i` stands for `network + 1 + i`, so slot 0 is the first host
//! address. Slots that would reach the broadcast address are never handed
//! out.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use fs2::FileExt;
use ipnetwork::Ipv4Network;

/// Longest prefix that still leaves an assignable address.
const MAX_PREFIX: u8 = 30;

/// Shortest prefix accepted; bounds the bitmap to 65 536 slots.
const MIN_PREFIX: u8 = 16;

const FREE: u8 = b'0';
const TAKEN: u8 = b'1';

/// Subnet CIDR to allocation bitmap.
pub type IpamState = BTreeMap<String, String>;

/// Persisted allocator of container addresses.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

impl Ipam {
    /// Creates an allocator persisting to `path`. The file is created on
    /// the first allocation.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hands out the lowest free address of `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::AllocationExhausted`] when every slot is
    /// taken, a configuration error for an unsupported prefix, or an I/O
    /// error if the state cannot be loaded or persisted.
    pub fn allocate(&self, subnet: Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = normalize(subnet)?;
        let ip = self.with_state(|state| {
            let key = subnet.to_string();
            let size = slot_count(subnet);
            let bitmap = state
                .entry(key.clone())
                .or_insert_with(|| "0".repeat(size));
            let mut bits = checked_bits(bitmap, size, &key)?;

            // Slot `size - 2` maps onto the broadcast address.
            let index = bits[..size - 2]
                .iter()
                .position(|b| *b == FREE)
                .ok_or_else(|| CorralError::AllocationExhausted { subnet: key.clone() })?;
            bits[index] = TAKEN;
            *bitmap = String::from_utf8_lossy(&bits).into_owned();
            Ok(address_at(subnet, index))
        })?;
        tracing::info!(%subnet, %ip, "address allocated");
        Ok(ip)
    }

    /// Returns `ip` to the pool of `subnet`.
    ///
    /// Releasing an address of a subnet that was never allocated from, or
    /// one that is already free, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `ip` is not a host address of
    /// `subnet`, or an I/O error if the state cannot be persisted.
    pub fn release(&self, subnet: Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let subnet = normalize(subnet)?;
        let index = index_of(subnet, ip)?;
        self.with_state(|state| {
            let key = subnet.to_string();
            let Some(bitmap) = state.get_mut(&key) else {
                tracing::warn!(%subnet, %ip, "release from untracked subnet ignored");
                return Ok(());
            };
            let mut bits = checked_bits(bitmap, slot_count(subnet), &key)?;
            bits[index] = FREE;
            *bitmap = String::from_utf8_lossy(&bits).into_owned();
            Ok(())
        })?;
        tracing::info!(%subnet, %ip, "address released");
        Ok(())
    }

    /// Reads the current state without locking.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<IpamState> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(IpamState::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IpamState::new()),
            Err(e) => Err(CorralError::io(&self.path, e)),
        }
    }

    /// Runs one load-mutate-persist cycle under an exclusive lock.
    fn with_state<T>(&self, mutate: impl FnOnce(&mut IpamState) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CorralError::io(parent, e))?;
        }
        let lock_path = self.lock_path();
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CorralError::io(&lock_path, e))?;
        lock.lock_exclusive().map_err(|e| CorralError::io(&lock_path, e))?;

        let mut state = self.load()?;
        let out = mutate(&mut state)?;
        self.persist(&state)?;

        lock.unlock().map_err(|e| CorralError::io(&lock_path, e))?;
        Ok(out)
    }

    /// Writes the state through a temporary file and an atomic rename.
    fn persist(&self, state: &IpamState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| CorralError::io(&tmp, e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| CorralError::io(&tmp, e))?;
            file.sync_all().map_err(|e| CorralError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| CorralError::io(&self.path, e))
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// Canonical form of a subnet: network address plus prefix.
fn normalize(subnet: Ipv4Network) -> Result<Ipv4Network> {
    let prefix = subnet.prefix();
    if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
        return Err(CorralError::config(format!(
            "subnet {subnet} must have a prefix between /{MIN_PREFIX} and /{MAX_PREFIX}"
        )));
    }
    Ipv4Network::new(subnet.network(), prefix)
        .map_err(|e| CorralError::config(format!("invalid subnet {subnet}: {e}")))
}

/// Number of bitmap slots: every address of the subnet, `2^(32 - prefix)`.
fn slot_count(subnet: Ipv4Network) -> usize {
    1usize << (32 - u32::from(subnet.prefix()))
}

fn address_at(subnet: Ipv4Network, index: usize) -> Ipv4Addr {
    // index < 2^16 because of MIN_PREFIX, so the cast is lossless.
    #[allow(clippy::cast_possible_truncation)]
    let offset = index as u32;
    Ipv4Addr::from(u32::from(subnet.network()) + 1 + offset)
}

fn index_of(subnet: Ipv4Network, ip: Ipv4Addr) -> Result<usize> {
    let base = u32::from(subnet.network()) + 1;
    let last = u32::from(subnet.broadcast());
    let addr = u32::from(ip);
    if addr < base || addr >= last {
        return Err(CorralError::config(format!(
            "{ip} is not a host address of {subnet}"
        )));
    }
    Ok((addr - base) as usize)
}

fn checked_bits(bitmap: &str, size: usize, subnet: &str) -> Result<Vec<u8>> {
    let bits = bitmap.as_bytes().to_vec();
    if bits.len() != size || bits.iter().any(|b| *b != FREE && *b != TAKEN) {
        return Err(CorralError::config(format!(
            "allocation bitmap for {subnet} is corrupt (length {}, expected {size})",
            bits.len()
        )));
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    fn scratch() -> (tempfile::TempDir, Ipam) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ipam = Ipam::new(dir.path().join("ipam").join("subnet.json"));
        (dir, ipam)
    }

    #[test]
    fn first_fit_then_reuse_after_release() {
        let (_dir, ipam) = scratch();
        let subnet = net("192.168.10.1/24");

        assert_eq!(ipam.allocate(subnet).unwrap(), Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(ipam.allocate(subnet).unwrap(), Ipv4Addr::new(192, 168, 10, 2));
        assert_eq!(ipam.allocate(subnet).unwrap(), Ipv4Addr::new(192, 168, 10, 3));

        ipam.release(subnet, Ipv4Addr::new(192, 168, 10, 2)).unwrap();
        assert_eq!(ipam.allocate(subnet).unwrap(), Ipv4Addr::new(192, 168, 10, 2));
    }

    #[test]
    fn state_file_holds_one_slot_per_address() {
        let (_dir, ipam) = scratch();
        ipam.allocate(net("10.20.0.0/24")).unwrap();

        let state = ipam.load().unwrap();
        let bitmap = &state["10.20.0.0/24"];
        assert_eq!(bitmap.len(), 256);
        assert!(bitmap.starts_with("10"));
        assert_eq!(bitmap.matches('1').count(), 1);
    }

    #[test]
    fn broadcast_is_never_handed_out() {
        let (_dir, ipam) = scratch();
        let subnet = net("172.16.0.0/30");
        assert_eq!(ipam.allocate(subnet).unwrap(), Ipv4Addr::new(172, 16, 0, 1));
        assert_eq!(ipam.allocate(subnet).unwrap(), Ipv4Addr::new(172, 16, 0, 2));
        // Slot 2 would be .3, the broadcast address.
        let err = ipam.allocate(subnet).unwrap_err();
        assert!(matches!(err, CorralError::AllocationExhausted { .. }));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn unsupported_prefixes_are_rejected() {
        let (_dir, ipam) = scratch();
        for bad in ["10.0.0.0/31", "10.0.0.0/32", "10.0.0.0/8"] {
            assert!(matches!(ipam.allocate(net(bad)), Err(CorralError::Config { .. })), "{bad}");
        }
        assert!(!ipam.path().exists());
    }

    #[test]
    fn release_outside_subnet_is_rejected() {
        let (_dir, ipam) = scratch();
        let subnet = net("192.168.10.0/24");
        ipam.allocate(subnet).unwrap();
        for bad in [
            Ipv4Addr::new(192, 168, 11, 5),
            Ipv4Addr::new(192, 168, 10, 0),
            Ipv4Addr::new(192, 168, 10, 255),
        ] {
            assert!(ipam.release(subnet, bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn release_of_untracked_subnet_is_noop() {
        let (_dir, ipam) = scratch();
        ipam.release(net("10.9.0.0/24"), Ipv4Addr::new(10, 9, 0, 7)).unwrap();
        assert!(ipam.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_bitmap_is_reported() {
        let (_dir, ipam) = scratch();
        std::fs::create_dir_all(ipam.path().parent().unwrap()).unwrap();
        std::fs::write(ipam.path(), r#"{"10.1.0.0/24":"0101"}"#).unwrap();
        assert!(matches!(
            ipam.allocate(net("10.1.0.0/24")),
            Err(CorralError::Config { .. })
        ));
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let (_dir, ipam) = scratch();
        let ipam = Arc::new(ipam);
        let subnet = net("10.30.0.0/24");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ipam = Arc::clone(&ipam);
                std::thread::spawn(move || {
                    (0..5).map(|_| ipam.allocate(subnet).unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        let all: Vec<Ipv4Addr> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 40);
        assert_eq!(unique.len(), 40);
    }
}
