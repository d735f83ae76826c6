//! # Command Line Interface
//!
//! Process-level flags. Everything behavioral (endpoints, overrides) comes
//! from environment variables via [`crate::Settings`]; the CLI only controls
//! where the process listens and how it logs.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gcp-secrets-provider")]
#[command(about = "Secrets Store CSI provider for Google Secret Manager and Parameter Manager")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Unix socket path the CSI driver connects to
    #[arg(
        long,
        default_value = "/etc/kubernetes/secrets-store-csi-providers/gcp.sock"
    )]
    pub socket_path: PathBuf,

    /// Prometheus metrics listen address; metrics are disabled when unset
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Default log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cli = Cli::parse_from(["gcp-secrets-provider"]);
        assert!(cli.socket_path.to_string_lossy().ends_with("gcp.sock"));
        assert!(cli.metrics_addr.is_none());
        assert_eq!(cli.log_level, "info");
        assert!(!cli.log_json);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "gcp-secrets-provider",
            "--socket-path",
            "/tmp/test.sock",
            "--metrics-addr",
            "127.0.0.1:9090",
            "--log-level",
            "debug",
            "--log-json",
        ]);
        assert_eq!(cli.socket_path, PathBuf::from("/tmp/test.sock"));
        assert_eq!(cli.metrics_addr.unwrap().port(), 9090);
        assert!(cli.log_json);
    }
}
