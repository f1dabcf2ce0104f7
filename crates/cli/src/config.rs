//! CLI flags and configuration (`spec.md` §6, `SPEC_FULL.md` §4.9).
//!
//! Grounded in `original_source/config/config.go` and `node_urls.go`: the
//! original uses the stdlib `flag` package with a custom `flag.Value`
//! (`NodeURLs`) to accumulate repeatable `--node` flags, and a `Validate()`
//! method that checks the port range. Here `clap`'s derive API replaces the
//! hand-rolled `flag.Value`, and `validate()` additionally checks that the
//! CA/cert files exist up front, so a misconfigured node fails fast with
//! every problem reported at once rather than failing at load time.

use clap::Parser;
use std::path::PathBuf;

/// Minimum log level that still gets printed, mirroring the original's
/// five-level scheme (`util/logger.go`).
#[derive(Copy, Clone, Debug, clap::ValueEnum, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Maps onto the nearest `tracing` level. `Fatal` has no tracing
    /// equivalent (the original always follows a fatal log with
    /// `os.Exit`); fatal-class messages are logged at `error!` here, one
    /// step before the process actually exits.
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Fatal | LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

/// Trinity node configuration, parsed from CLI flags (`spec.md` §6).
#[derive(Parser, Debug)]
#[command(name = "trinity", version, about = "Clustered in-memory key/value cache")]
pub struct Config {
    /// URL of another trinity node to connect to at startup. Repeatable.
    #[arg(long = "node")]
    pub nodes: Vec<String>,

    /// CA pool PEM file, used as the mutual-TLS trust root for the mesh.
    #[arg(long, default_value = "ca.pem")]
    pub ca: PathBuf,

    /// This node's certificate/key PEM bundle.
    #[arg(long, default_value = "cert.pem")]
    pub cert: PathBuf,

    /// Cluster TLS listener port.
    #[arg(long, default_value_t = 13531)]
    pub port: u16,

    /// Address advertised to peers in the DISTRIBUTION packet. Defaults to
    /// `localhost:<port>` if not given.
    #[arg(long)]
    pub hostaddr: Option<String>,

    /// Minimum log level to print.
    #[arg(long, value_enum, default_value_t = LogLevel::Error)]
    pub loglevel: LogLevel,

    /// Enable the memcached-compatible client front-end.
    #[arg(long, default_value_t = false)]
    pub memcache: bool,

    /// Port for the memcached front-end, if enabled.
    #[arg(long, default_value_t = 11211)]
    pub memcacheport: u16,

    /// Disables the peer heartbeat ticker. Development use only: without
    /// heartbeats, dead peers are never detected via defib/disconnect.
    #[arg(long, default_value_t = false)]
    pub disable_heartbeat: bool,
}

impl Config {
    /// The address this node advertises to peers, resolving the
    /// `--hostaddr` default against `--port` (clap cannot express a
    /// cross-field default declaratively).
    pub fn host_addr(&self) -> String {
        self.hostaddr
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", self.port))
    }

    /// Validates the configuration, collecting every problem rather than
    /// failing at the first one (`spec.md` §6 exit-code contract).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errs = Vec::new();

        if !self.ca.exists() {
            errs.push(format!("CA file '{}' does not exist", self.ca.display()));
        }
        if !self.cert.exists() {
            errs.push(format!("certificate file '{}' does not exist", self.cert.display()));
        }
        if self.memcache && self.memcacheport == self.port {
            errs.push(format!(
                "memcache port {} collides with cluster port {}",
                self.memcacheport, self.port
            ));
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostaddr_defaults_from_port() {
        let cfg = Config::parse_from(["trinity", "--port", "9999"]);
        assert_eq!(cfg.host_addr(), "localhost:9999");
    }

    #[test]
    fn explicit_hostaddr_is_preserved() {
        let cfg = Config::parse_from(["trinity", "--hostaddr", "example.com:1"]);
        assert_eq!(cfg.host_addr(), "example.com:1");
    }

    #[test]
    fn validate_reports_missing_ca_and_cert() {
        let cfg = Config::parse_from([
            "trinity",
            "--ca",
            "/nonexistent/ca.pem",
            "--cert",
            "/nonexistent/cert.pem",
        ]);
        let errs = cfg.validate().unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn repeated_node_flags_accumulate() {
        let cfg = Config::parse_from([
            "trinity",
            "--node",
            "a:1",
            "--node",
            "b:2",
        ]);
        assert_eq!(cfg.nodes, vec!["a:1".to_string(), "b:2".to_string()]);
    }
}
