//! Command line and environment configuration.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use config_hub_core::layout;
use config_hub_core::watch::WatchConfig;

pub const ROOT_ENV: &str = "CONFIG_HUB_ROOT";
pub const ADDR_ENV: &str = "CONFIG_HUB_ADDR";
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[derive(Parser, Debug, Default)]
#[command(name = "config-hub")]
#[command(about = "Serves and watches the ~/.claude configuration directory")]
pub struct Cli {
    /// Configuration root [env: CONFIG_HUB_ROOT, default: ~/.claude]
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Listen address [env: CONFIG_HUB_ADDR, default: 127.0.0.1:3000]
    #[arg(short, long)]
    pub addr: Option<String>,

    /// Quiet period before a change is reported, in milliseconds
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Heartbeat interval on the change stream, in seconds
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub addr: SocketAddr,
    pub watch: WatchConfig,
}

/// Resolves the configuration: flags win over the environment, which wins
/// over built-in defaults.
pub fn load_config(cli: Cli) -> Result<Config> {
    load_config_with(cli, |key| std::env::var(key).ok())
}

fn load_config_with(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let root = match cli.root.or_else(|| env(ROOT_ENV).map(PathBuf::from)) {
        Some(root) => root,
        None => layout::default_root()
            .ok_or_else(|| anyhow!("no home directory; pass --root or set {}", ROOT_ENV))?,
    };

    let addr = cli
        .addr
        .or_else(|| env(ADDR_ENV))
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let addr = addr
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("invalid listen address {:?}: {}", addr, e))?;

    let mut watch = WatchConfig::default();
    if let Some(ms) = cli.debounce_ms {
        watch.debounce = Duration::from_millis(ms);
    }
    if let Some(secs) = cli.heartbeat_secs {
        if secs == 0 {
            return Err(anyhow!("--heartbeat-secs must be positive"));
        }
        watch.heartbeat = Duration::from_secs(secs);
    }

    Ok(Config { root, addr, watch })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_flags_or_env() {
        let config = load_config_with(Cli::default(), env_of(&[])).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR.parse().unwrap());
        assert!(config.root.ends_with(".claude"));
        assert_eq!(config.watch.debounce, layout::DEFAULT_DEBOUNCE);
        assert_eq!(config.watch.heartbeat, layout::DEFAULT_HEARTBEAT);
    }

    #[test]
    fn flags_override_environment() {
        let env = env_of(&[(ROOT_ENV, "/srv/claude"), (ADDR_ENV, "0.0.0.0:8080")]);
        let config = load_config_with(
            Cli {
                addr: Some("127.0.0.1:9000".into()),
                debounce_ms: Some(250),
                ..Cli::default()
            },
            env,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/claude"));
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.watch.debounce, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        let env = env_of(&[(ROOT_ENV, "/tmp/x")]);
        assert!(load_config_with(
            Cli {
                addr: Some("not-an-address".into()),
                ..Cli::default()
            },
            &env,
        )
        .is_err());
        assert!(load_config_with(
            Cli {
                heartbeat_secs: Some(0),
                ..Cli::default()
            },
            &env,
        )
        .is_err());
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from(["config-hub", "--root", "/r", "--debounce-ms", "10"]);
        assert_eq!(cli.root, Some(PathBuf::from("/r")));
        assert_eq!(cli.debounce_ms, Some(10));
        assert_eq!(cli.heartbeat_secs, None);
    }
}
