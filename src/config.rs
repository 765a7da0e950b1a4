use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use log::warn;

/// Real-time whiteboard relay: room-scoped WebSocket fan-out with snapshot
/// and chat persistence.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "WHITEBOARD_ADDR", default_value = "0.0.0.0:8000")]
    pub addr: SocketAddr,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://whiteboard.db")]
    pub database_url: String,

    /// PEM certificate; together with --tls-key enables HTTPS/WSS
    #[arg(long, env = "WHITEBOARD_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "WHITEBOARD_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Largest accepted body for the save endpoint, in bytes
    #[arg(long, env = "WHITEBOARD_MAX_SNAPSHOT_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_snapshot_bytes: u64,
}

impl Config {
    /// Certificate and key paths if TLS is configured and both files exist.
    /// A partial or broken TLS setup is reported and ignored.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => {
                if cert.is_file() && key.is_file() {
                    Some((cert.clone(), key.clone()))
                } else {
                    warn!(
                        "TLS certificate {} or key {} not found",
                        cert.display(),
                        key.display()
                    );
                    None
                }
            }
            (None, None) => None,
            _ => {
                warn!("Both --tls-cert and --tls-key are required for TLS");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "whiteboard_relay",
            "--addr",
            "127.0.0.1:9000",
            "--database-url",
            "sqlite::memory:",
            "--max-snapshot-bytes",
            "1024",
        ])
        .unwrap();

        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_snapshot_bytes, 1024);
    }

    #[test]
    fn test_bad_address_is_rejected() {
        assert!(Config::try_parse_from(["whiteboard_relay", "--addr", "nowhere"]).is_err());
    }

    #[test]
    fn test_tls_needs_existing_cert_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("certificate.pem");
        let key = dir.path().join("private.key");
        std::fs::write(&cert, "cert").unwrap();

        let mut config = Config::try_parse_from(["whiteboard_relay"]).unwrap();
        config.tls_cert = Some(cert.clone());
        assert_eq!(config.tls_paths(), None);

        config.tls_key = Some(key.clone());
        assert_eq!(config.tls_paths(), None);

        std::fs::write(&key, "key").unwrap();
        assert_eq!(config.tls_paths(), Some((cert, key)));
    }
}
