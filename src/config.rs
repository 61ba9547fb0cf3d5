//! Server settings, read once from `STAYD_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "stayd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            lock_timeout: crate::limits::DEFAULT_LOCK_TIMEOUT,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let num = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            port: num("STAYD_PORT")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(d.port),
            bind: lookup("STAYD_BIND").unwrap_or(d.bind),
            data_dir: lookup("STAYD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("STAYD_PASSWORD").unwrap_or(d.password),
            max_connections: num("STAYD_MAX_CONNECTIONS")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(d.max_connections),
            compact_threshold: num("STAYD_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            lock_timeout: num("STAYD_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.lock_timeout),
            metrics_port: num("STAYD_METRICS_PORT").and_then(|v| u16::try_from(v).ok()),
            tls_cert: lookup("STAYD_TLS_CERT"),
            tls_key: lookup("STAYD_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = from_pairs(&[]);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn values_override_defaults() {
        let cfg = from_pairs(&[
            ("STAYD_PORT", "6000"),
            ("STAYD_DATA_DIR", "/var/lib/stayd"),
            ("STAYD_LOCK_TIMEOUT_MS", "250"),
            ("STAYD_METRICS_PORT", "9100"),
            ("STAYD_TLS_CERT", "cert.pem"),
        ]);
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/stayd"));
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(cfg.tls_key, None);
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let cfg = from_pairs(&[
            ("STAYD_PORT", "99999"),
            ("STAYD_MAX_CONNECTIONS", "0"),
            ("STAYD_COMPACT_THRESHOLD", "lots"),
            ("STAYD_METRICS_PORT", "off"),
        ]);
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
    }
}
