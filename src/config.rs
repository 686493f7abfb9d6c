//! Server configuration from `TABLEBOOK_*` environment variables.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON document with restaurants and tables.
    pub directory_path: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: lookup("TABLEBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "TABLEBOOK_PORT", 5434),
            data_dir: lookup("TABLEBOOK_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            directory_path: lookup("TABLEBOOK_DIRECTORY")
                .unwrap_or_else(|| "./seed/directory.json".into())
                .into(),
            password: lookup("TABLEBOOK_PASSWORD").unwrap_or_else(|| "tablebook".into()),
            max_connections: parsed(&lookup, "TABLEBOOK_MAX_CONNECTIONS", 256),
            metrics_port: lookup("TABLEBOOK_METRICS_PORT").and_then(|s| match s.parse() {
                Ok(port) => Some(port),
                Err(e) => {
                    warn!("invalid TABLEBOOK_METRICS_PORT {s:?}: {e}, metrics disabled");
                    None
                }
            }),
            tls_cert: lookup("TABLEBOOK_TLS_CERT"),
            tls_key: lookup("TABLEBOOK_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn clients_wal(&self) -> PathBuf {
        self.data_dir.join("clients.wal")
    }

    pub fn reservations_wal(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("invalid {key} value {raw:?}: {e}, using default {default}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.listen_addr(), "0.0.0.0:5434");
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.directory_path, PathBuf::from("./seed/directory.json"));
        assert_eq!(c.password, "tablebook");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.tls_cert, None);
        assert_eq!(c.clients_wal(), PathBuf::from("./data/clients.wal"));
        assert_eq!(c.reservations_wal(), PathBuf::from("./data/reservations.wal"));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("TABLEBOOK_BIND", "127.0.0.1"),
            ("TABLEBOOK_PORT", "6000"),
            ("TABLEBOOK_DATA_DIR", "/var/lib/tablebook"),
            ("TABLEBOOK_MAX_CONNECTIONS", "8"),
            ("TABLEBOOK_METRICS_PORT", "9100"),
            ("TABLEBOOK_TLS_CERT", "cert.pem"),
            ("TABLEBOOK_TLS_KEY", "key.pem"),
        ]);
        assert_eq!(c.listen_addr(), "127.0.0.1:6000");
        assert_eq!(c.reservations_wal(), PathBuf::from("/var/lib/tablebook/reservations.wal"));
        assert_eq!(c.max_connections, 8);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(c.tls_key.as_deref(), Some("key.pem"));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let c = config(&[
            ("TABLEBOOK_PORT", "not-a-port"),
            ("TABLEBOOK_MAX_CONNECTIONS", "-1"),
            ("TABLEBOOK_METRICS_PORT", "99999"),
        ]);
        assert_eq!(c.port, 5434);
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.metrics_port, None);
    }
}
