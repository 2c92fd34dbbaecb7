//! Placeholder resolution.
//!
//! The leader publishes one allocation for every provider unit, with
//! `*BINDING*` and `*ADVERTISE*` in place of addresses. Each unit substitutes
//! its own hostnames and publishes the result as its `bootstrap-data`.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::base::RelationBase;
use super::listener::types::ListenerAllocation;
use crate::constants::{ADVERTISE_PLACEHOLDER, BINDING_PLACEHOLDER, BOOTSTRAP_DATA_KEY};
use crate::error::{Error, Result};

/// Maps a network address to the hostname advertised for it.
pub trait HostnameResolver: Send + Sync {
    fn hostname(&self, address: &str) -> Result<String>;
}

/// Fixed address to hostname table. Unknown addresses resolve to themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticHostnames {
    names: HashMap<String, String>,
    fallback: Option<String>,
}

impl StaticHostnames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every address to `hostname`.
    pub fn fixed(hostname: impl Into<String>) -> Self {
        Self {
            names: HashMap::new(),
            fallback: Some(hostname.into()),
        }
    }

    pub fn with(mut self, address: impl Into<String>, hostname: impl Into<String>) -> Self {
        self.names.insert(address.into(), hostname.into());
        self
    }
}

impl HostnameResolver for StaticHostnames {
    fn hostname(&self, address: &str) -> Result<String> {
        Ok(self
            .names
            .get(address)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| address.to_string()))
    }
}

/// Resolves through the hosts file, falling back to the machine hostname.
#[derive(Debug, Clone)]
pub struct SystemHostnames {
    hosts_file: PathBuf,
    machine_hostname: Option<String>,
}

impl Default for SystemHostnames {
    fn default() -> Self {
        Self::new("/etc/hosts")
    }
}

impl SystemHostnames {
    pub fn new(hosts_file: impl Into<PathBuf>) -> Self {
        Self {
            hosts_file: hosts_file.into(),
            machine_hostname: None,
        }
    }

    /// Use `hostname` instead of asking the operating system.
    pub fn with_machine_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.machine_hostname = Some(hostname.into());
        self
    }

    fn machine_hostname(&self) -> Result<String> {
        if let Some(name) = &self.machine_hostname {
            return Ok(name.clone());
        }
        let name = nix::unistd::gethostname()?;
        name.into_string()
            .map_err(|_| Error::Config("machine hostname is not valid UTF-8".to_string()))
    }

    fn read_hosts(&self) -> Result<String> {
        match fs::read_to_string(&self.hosts_file) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rewrite a loopback mapping of the machine hostname in the hosts file
    /// so that it points at `address`. Returns whether the file changed.
    pub fn fix_hosts_file(&self, address: &str) -> Result<bool> {
        let machine = self.machine_hostname()?;
        let current = self.read_hosts()?;
        let corrected = correct_hosts(&current, &machine, address);
        if corrected == current {
            return Ok(false);
        }
        fs::write(&self.hosts_file, corrected)?;
        Ok(true)
    }
}

impl HostnameResolver for SystemHostnames {
    fn hostname(&self, address: &str) -> Result<String> {
        if let Some(name) = lookup_hosts(&self.read_hosts()?, address) {
            return Ok(name);
        }
        let machine = self.machine_hostname()?;
        debug!(address, hostname = %machine, "Address not in hosts file, using machine hostname");
        Ok(machine)
    }
}

fn is_loopback(address: &str) -> bool {
    address
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// First hostname mapped to `address` in hosts-file `contents`.
pub fn lookup_hosts(contents: &str, address: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some(ip) if ip == address => fields.next().map(str::to_string),
            _ => None,
        }
    })
}

/// Move `hostname` off loopback lines and map it to `address` instead.
///
/// Some images ship `127.0.1.1 <hostname>`, which would make the unit
/// advertise a loopback address to its peers. Only the hostname token is
/// removed; other names on the same line keep their mapping, and a loopback
/// line left without names is dropped. `localhost` stays mapped.
pub fn correct_hosts(contents: &str, hostname: &str, address: &str) -> String {
    if is_loopback(address) {
        return contents.to_string();
    }
    let mut corrected = String::with_capacity(contents.len());
    let mut moved = false;
    let mut has_localhost = false;
    for line in contents.lines() {
        let (body, comment) = match line.find('#') {
            Some(at) => line.split_at(at),
            None => (line, ""),
        };
        let mut fields = body.split_whitespace();
        let Some(ip) = fields.next() else {
            corrected.push_str(line);
            corrected.push('\n');
            continue;
        };
        let names: Vec<&str> = fields.collect();
        if !is_loopback(ip) || !names.contains(&hostname) {
            has_localhost |= is_loopback(ip) && names.contains(&"localhost");
            corrected.push_str(line);
            corrected.push('\n');
            continue;
        }

        warn!(hostname, address, "Hosts file maps hostname to loopback, correcting");
        let remaining: Vec<&str> = names.into_iter().filter(|n| *n != hostname).collect();
        if !remaining.is_empty() {
            has_localhost |= remaining.contains(&"localhost");
            corrected.push_str(&format!("{} {}", ip, remaining.join(" ")));
            if !comment.is_empty() {
                corrected.push(' ');
                corrected.push_str(comment);
            }
            corrected.push('\n');
        }
        if !moved {
            corrected.push_str(&format!("{} {}\n", address, hostname));
            moved = true;
        }
    }
    if moved && !has_localhost {
        corrected.push_str("127.0.0.1 localhost\n");
    }
    corrected
}

/// The local unit's hostnames for both placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addresses {
    pub binding: String,
    pub advertise: String,
}

impl Addresses {
    pub fn new(binding: impl Into<String>, advertise: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            advertise: advertise.into(),
        }
    }
}

/// Look up the local unit's addresses on `base`'s network space.
pub async fn local_addresses(
    base: &RelationBase,
    hostnames: &dyn HostnameResolver,
) -> Result<Addresses> {
    let binding = base.binding().await?;
    Ok(Addresses {
        binding: hostnames.hostname(&binding.bind_address)?,
        advertise: hostnames.hostname(&binding.ingress_address)?,
    })
}

/// Substitute placeholders in `template` and parse the result.
pub fn resolve(template: &str, addresses: &Addresses) -> Result<ListenerAllocation> {
    if template.trim().is_empty() {
        return Err(Error::EmptyTemplate);
    }
    let resolved = template
        .replace(BINDING_PLACEHOLDER, &addresses.binding)
        .replace(ADVERTISE_PLACEHOLDER, &addresses.advertise);
    ListenerAllocation::from_json(BOOTSTRAP_DATA_KEY, &resolved)
}

/// Resolve `template` and publish it, without store passwords, as this
/// unit's `bootstrap-data` on every relation instance.
///
/// Returns the resolved allocation, passwords included, for local use.
pub async fn publish_bootstrap_data(
    base: &RelationBase,
    template: &str,
    addresses: &Addresses,
) -> Result<ListenerAllocation> {
    let resolved = resolve(template, addresses)?;
    let payload = resolved.without_secrets().to_json()?;
    for relation in base.relations().await? {
        base.send(&relation, BOOTSTRAP_DATA_KEY, &payload).await?;
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"{"connect": {"endpoint": "connect://*BINDING*:9092",
        "advertise": "connect://*BINDING*:9092", "bootstrap_server": "*BINDING*:9092",
        "port": 9092, "secprot": "PLAINTEXT", "SASL": {}, "cert_present": false,
        "sasl_present": false, "ts_pwd": "secret"},
        "ksql": {"endpoint": "ksql://*ADVERTISE*:9093", "advertise": "ksql://*ADVERTISE*:9093",
        "bootstrap_server": "*ADVERTISE*:9093", "port": 9093, "secprot": "SSL",
        "SASL": {}, "cert_present": true, "sasl_present": false}}"#;

    #[test]
    fn test_resolve_replaces_placeholders() {
        let addrs = Addresses::new("broker-0.internal", "broker-0.example.com");
        let alloc = resolve(TEMPLATE, &addrs).unwrap();
        assert_eq!(alloc.get("connect").unwrap().bootstrap_server, "broker-0.internal:9092");
        assert_eq!(
            alloc.get("ksql").unwrap().endpoint,
            "ksql://broker-0.example.com:9093"
        );
        let json = alloc.to_json().unwrap();
        assert!(!json.contains(BINDING_PLACEHOLDER));
        assert!(!json.contains(ADVERTISE_PLACEHOLDER));
    }

    #[test]
    fn test_resolve_empty_template() {
        let addrs = Addresses::new("a", "b");
        assert_eq!(resolve("", &addrs).unwrap_err(), Error::EmptyTemplate);
        assert_eq!(resolve("  ", &addrs).unwrap_err(), Error::EmptyTemplate);
    }

    #[test]
    fn test_resolve_malformed_template() {
        let err = resolve("{\"a\": 1}", &Addresses::new("a", "b")).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn test_static_hostnames() {
        let names = StaticHostnames::new().with("10.0.0.1", "broker-0");
        assert_eq!(names.hostname("10.0.0.1").unwrap(), "broker-0");
        assert_eq!(names.hostname("10.0.0.2").unwrap(), "10.0.0.2");
        assert_eq!(StaticHostnames::fixed("b").hostname("x").unwrap(), "b");
    }

    #[test]
    fn test_lookup_hosts_skips_comments() {
        let hosts = "# 10.0.0.5 commented\n127.0.0.1 localhost\n10.0.0.5  broker-0 broker-0.lan # main\n";
        assert_eq!(lookup_hosts(hosts, "10.0.0.5").as_deref(), Some("broker-0"));
        assert_eq!(lookup_hosts(hosts, "10.0.0.9"), None);
    }

    #[test]
    fn test_correct_hosts_rewrites_loopback_hostname() {
        let hosts = "127.0.0.1 localhost\n127.0.1.1 broker-0\n";
        let fixed = correct_hosts(hosts, "broker-0", "10.0.0.5");
        assert_eq!(fixed, "127.0.0.1 localhost\n10.0.0.5 broker-0\n");
        assert_eq!(lookup_hosts(&fixed, "10.0.0.5").as_deref(), Some("broker-0"));
    }

    #[test]
    fn test_correct_hosts_keeps_other_names() {
        let fixed = correct_hosts("127.0.0.1 localhost broker-0\n", "broker-0", "10.0.0.5");
        assert_eq!(fixed, "127.0.0.1 localhost\n10.0.0.5 broker-0\n");
        assert_eq!(lookup_hosts(&fixed, "127.0.0.1").as_deref(), Some("localhost"));
    }

    #[test]
    fn test_correct_hosts_maas_layout() {
        let hosts = "# This is a comment\n# And one more\n\n\n\
                     127.0.0.1 nodetest\n\
                     127.0.1.1 nodetest.maas\n\
                     ::1 ip6-localhost ip6-loopback\n";
        let fixed = correct_hosts(hosts, "nodetest.maas", "1.1.1.1");
        assert_eq!(
            fixed,
            "# This is a comment\n# And one more\n\n\n\
             127.0.0.1 nodetest\n\
             1.1.1.1 nodetest.maas\n\
             ::1 ip6-localhost ip6-loopback\n\
             127.0.0.1 localhost\n"
        );
        assert_eq!(lookup_hosts(&fixed, "1.1.1.1").as_deref(), Some("nodetest.maas"));
        assert_eq!(correct_hosts(&fixed, "nodetest.maas", "1.1.1.1"), fixed);
    }

    #[test]
    fn test_correct_hosts_ignores_loopback_target() {
        let hosts = "127.0.1.1 broker-0\n";
        assert_eq!(correct_hosts(hosts, "broker-0", "127.0.0.1"), hosts);
    }

    #[test]
    fn test_system_hostnames_from_hosts_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "127.0.1.1 broker-0\n10.0.0.7 other\n").unwrap();
        let resolver = SystemHostnames::new(&path).with_machine_hostname("broker-0");

        assert_eq!(resolver.hostname("10.0.0.7").unwrap(), "other");
        assert_eq!(resolver.hostname("10.0.0.5").unwrap(), "broker-0");

        let missing = SystemHostnames::new(dir.path().join("nope")).with_machine_hostname("m");
        assert_eq!(missing.hostname("10.0.0.5").unwrap(), "m");
    }

    #[test]
    fn test_fix_hosts_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "127.0.0.1 localhost\n127.0.1.1 broker-0\n").unwrap();
        let resolver = SystemHostnames::new(&path).with_machine_hostname("broker-0");

        assert!(resolver.fix_hosts_file("10.0.0.5").unwrap());
        assert!(!resolver.fix_hosts_file("10.0.0.5").unwrap());
        assert_eq!(resolver.hostname("10.0.0.5").unwrap(), "broker-0");
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "127.0.0.1 localhost\n10.0.0.5 broker-0\n"
        );
    }
}
