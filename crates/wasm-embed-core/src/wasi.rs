//! WASI pass-through configuration owned by a module.
//!
//! Nothing here interprets WASI calls; these are the arguments handed to the
//! engine when an instance is created. The module owns them, so they stay
//! valid for as long as any instance may read them.

use std::net::IpAddr;

use wasm_embed_common::{ConfigError, WasiConfig};

/// How a standard stream of the guest is wired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioMode {
    /// Share the host process stream.
    #[default]
    Inherit,
    /// Reads see end-of-file, writes are discarded.
    Null,
}

/// Standard stream wiring for the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stdio {
    /// Guest stdin.
    pub stdin: StdioMode,
    /// Guest stdout.
    pub stdout: StdioMode,
    /// Guest stderr.
    pub stderr: StdioMode,
}

/// A host directory exposed to the guest under another path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirMapping {
    /// Path seen by the guest.
    pub guest: String,
    /// Path on the host.
    pub host: String,
}

impl DirMapping {
    /// Parse a `GUEST::HOST` mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the separator is missing or a side is empty.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        match entry.split_once("::") {
            Some((guest, host)) if !guest.is_empty() && !host.is_empty() => Ok(Self {
                guest: guest.to_string(),
                host: host.to_string(),
            }),
            _ => Err(ConfigError::invalid_value(
                "map_dirs",
                format!("'{entry}' is not of the form GUEST::HOST"),
            )),
        }
    }
}

/// WASI arguments of one module.
#[derive(Debug, Clone, Default)]
pub struct WasiArgs {
    /// Host directories pre-opened under the same path.
    pub dirs: Vec<String>,
    /// Directories pre-opened under a different guest path.
    pub map_dirs: Vec<DirMapping>,
    /// Environment as `(key, value)` pairs.
    pub env: Vec<(String, String)>,
    /// Program arguments, `argv[0]` included.
    pub argv: Vec<String>,
    /// Standard stream wiring.
    pub stdio: Stdio,
    /// Addresses guest sockets may use.
    pub addr_pool: AddrPool,
    /// Host names guest name lookups may resolve.
    pub ns_lookup_pool: NsLookupPool,
}

impl WasiArgs {
    /// Build from the textual forms used by the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory mapping or address pool entry is
    /// malformed.
    pub fn from_config(config: &WasiConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            dirs: config.dirs.clone(),
            map_dirs: config
                .map_dirs
                .iter()
                .map(|entry| DirMapping::parse(entry))
                .collect::<Result<_, _>>()?,
            env: config.env.iter().map(|entry| parse_env(entry)).collect(),
            argv: Vec::new(),
            stdio: Stdio::default(),
            addr_pool: AddrPool::parse(&config.addr_pool)?,
            ns_lookup_pool: NsLookupPool::new(config.ns_lookup_pool.iter().cloned()),
        })
    }
}

/// Split `KEY=VALUE`; an entry without `=` becomes a key with an empty value.
pub fn parse_env(entry: &str) -> (String, String) {
    match entry.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => (entry.to_string(), String::new()),
    }
}

/// Set of IP addresses and CIDR blocks.
///
/// An empty pool allows nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrPool {
    blocks: Vec<(IpAddr, u8)>,
}

impl AddrPool {
    /// Parse entries such as `127.0.0.1`, `10.0.0.0/8` or `::1/128`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddrPool`] for the first malformed entry.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let blocks = entries
            .iter()
            .map(|entry| parse_block(entry.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { blocks })
    }

    /// Returns `true` if `addr` lies in one of the blocks.
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.blocks
            .iter()
            .any(|&(network, prefix)| in_block(network, prefix, addr))
    }

    /// Returns `true` if the pool has no entries.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }
}

fn parse_block(entry: &str) -> Result<(IpAddr, u8), ConfigError> {
    let invalid = || ConfigError::InvalidAddrPool {
        entry: entry.to_string(),
    };

    let (addr, prefix) = match entry.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (entry, None),
    };
    let addr: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    let prefix = match prefix {
        Some(prefix) => prefix.trim().parse::<u8>().map_err(|_| invalid())?,
        None => max,
    };
    if prefix > max {
        return Err(invalid());
    }
    Ok((addr, prefix))
}

fn in_block(network: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(network), IpAddr::V4(addr)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u32::from(network) & mask == u32::from(addr) & mask
        }
        (IpAddr::V6(network), IpAddr::V6(addr)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(network) & mask == u128::from(addr) & mask
        }
        _ => false,
    }
}

/// Host name patterns allowed for guest name lookups.
///
/// Patterns are exact names, `*.example.com` (any subdomain and the domain
/// itself), or `*` (anything).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NsLookupPool {
    patterns: Vec<String>,
}

impl NsLookupPool {
    /// Create a pool from patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }

    /// Returns `true` if `host` matches one of the patterns.
    pub fn allows(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.patterns
            .iter()
            .any(|pattern| matches_pattern(pattern, &host))
    }

    /// Returns `true` if the pool contains the `*` wildcard.
    pub fn allows_any(&self) -> bool {
        self.patterns.iter().any(|pattern| pattern == "*")
    }

    /// Returns `true` if the pool has no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The patterns as given.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn matches_pattern(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix("*.") {
        Some(domain) => host == domain || host.ends_with(&format!(".{domain}")),
        None => pattern == host,
    }
}
