//! Egress address allocation and quarantine.
//!
//! Hands out proxy endpoints under a per-address cooldown, falls back to the
//! least-recently-used endpoint when every address is cooling down, and keeps
//! a blacklist that is persisted to disk on every addition.

use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default minimum time between two uses of the same address.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

const BLACKLIST_FILE_NAME: &str = "bad_proxies.txt";

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    pub cooldown: Duration,
    /// Where the blacklist is read from and rewritten to. `None` keeps the
    /// blacklist in memory only.
    pub blacklist_path: Option<PathBuf>,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            blacklist_path: None,
        }
    }
}

impl ProxyPoolConfig {
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_blacklist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.blacklist_path = Some(path.into());
        self
    }
}

/// Snapshot of the pool used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHealth {
    pub total: usize,
    pub usable: usize,
    pub blacklisted: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    last_used: Option<Instant>,
    sequence: u64,
}

/// Proxy pool with cooldown-based rotation and a persisted blacklist.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    live: Vec<String>,
    blacklist: HashSet<String>,
    usage: HashMap<String, Usage>,
    next_sequence: u64,
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            live: Vec::new(),
            blacklist: HashSet::new(),
            usage: HashMap::new(),
            next_sequence: 1,
        }
    }

    /// Load the live list from `live_path` and the blacklist from the
    /// configured path. Missing files yield empty sets.
    pub fn from_files(live_path: &Path, config: ProxyPoolConfig) -> Self {
        let mut pool = Self::new(config);
        pool.load(read_address_list(live_path));
        if let Some(path) = pool.config.blacklist_path.clone() {
            pool.blacklist = read_address_list(&path).into_iter().collect();
        }

        let health = pool.health_report();
        log::info!(
            "loaded {} proxies, {} already blacklisted",
            health.total,
            health.blacklisted
        );
        pool
    }

    /// Replace the live set. Duplicates are ignored.
    pub fn load<I>(&mut self, addresses: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.live.clear();
        self.usage.clear();
        for address in addresses {
            self.add_address(address);
        }
    }

    pub fn add_address(&mut self, address: impl Into<String>) {
        let address = address.into();
        if address.is_empty() || self.usage.contains_key(&address) {
            return;
        }
        self.usage.insert(address.clone(), Usage::default());
        self.live.push(address);
    }

    /// Pick an address for the next request, or `None` when every live
    /// address is blacklisted.
    pub fn acquire(&mut self) -> Option<String> {
        let now = Instant::now();
        let cooldown = self.config.cooldown;

        let usable: Vec<&String> = self
            .live
            .iter()
            .filter(|address| !self.blacklist.contains(*address))
            .collect();

        if usable.is_empty() {
            log::error!("every proxy is blacklisted or none were loaded");
            return None;
        }

        let rested: Vec<&String> = usable
            .iter()
            .copied()
            .filter(|address| match self.usage.get(*address).and_then(|u| u.last_used) {
                Some(last) => now.duration_since(last) > cooldown,
                None => true,
            })
            .collect();

        let selected = match rested.choose(&mut rand::thread_rng()) {
            Some(address) => (*address).clone(),
            None => {
                log::warn!("all usable proxies are cooling down; reusing the least recently used");
                usable
                    .iter()
                    .min_by_key(|address| {
                        self.usage.get(**address).map(|u| u.sequence).unwrap_or(0)
                    })
                    .map(|address| (*address).clone())?
            }
        };

        self.touch(&selected, now);
        Some(selected)
    }

    /// Quarantine `address` for the rest of the run. Returns `true` when the
    /// address was newly blacklisted.
    pub fn release_as_bad(&mut self, address: &str) -> bool {
        if address.is_empty() || self.blacklist.contains(address) {
            return false;
        }

        self.blacklist.insert(address.to_string());
        if let Err(err) = self.persist_blacklist() {
            log::error!("failed to persist proxy blacklist: {err}");
        }

        let health = self.health_report();
        log::warn!(
            "proxy marked unusable: {address}; {} usable proxies remain",
            health.usable
        );
        true
    }

    pub fn is_exhausted(&self) -> bool {
        !self
            .live
            .iter()
            .any(|address| !self.blacklist.contains(address))
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklist.contains(address)
    }

    pub fn health_report(&self) -> PoolHealth {
        let usable = self
            .live
            .iter()
            .filter(|address| !self.blacklist.contains(*address))
            .count();
        PoolHealth {
            total: self.live.len(),
            usable,
            blacklisted: self.blacklist.len(),
        }
    }

    fn touch(&mut self, address: &str, now: Instant) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let Some(usage) = self.usage.get_mut(address) {
            usage.last_used = Some(now);
            usage.sequence = sequence;
        }
    }

    fn persist_blacklist(&self) -> io::Result<()> {
        let Some(path) = &self.config.blacklist_path else {
            return Ok(());
        };

        let mut entries: Vec<&String> = self.blacklist.iter().collect();
        entries.sort();
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(entry);
            contents.push('\n');
        }
        fs::write(path, contents)
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(ProxyPoolConfig::default())
    }
}

/// Default blacklist location: `bad_proxies.txt` next to the live list.
pub fn default_blacklist_path(live_path: &Path) -> PathBuf {
    live_path
        .parent()
        .map(|dir| dir.join(BLACKLIST_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(BLACKLIST_FILE_NAME))
}

fn read_address_list(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            log::error!("failed to read proxy list {}: {err}", path.display());
            Vec::new()
        }
    }
}
