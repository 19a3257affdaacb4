//! CLI flags and daemon configuration.
//!
//! Flags (manual parsing, no CLI framework):
//!
//!   --pub                  Use public bootstrap nodes
//!   --dhtproto <ID>        DHT protocol ID (private bootstraps only)
//!   --discoverysvc <NAME>  Service name tag for DHT discovery
//!   --mdns / --no-mdns     Toggle mDNS local discovery
//!   --mdnstag <TAG>        Service tag for mDNS discovery
//!   --api <ADDR>           API listen address (host:port, port 0 = auto)
//!   --data-dir <PATH>      Override the app data directory

use std::path::PathBuf;

use directories::ProjectDirs;

use peerchat_network::config::{parse_multiaddrs, DEFAULT_BOOTSTRAP_NODES, PUBLIC_BOOTSTRAP_NODES};
use peerchat_network::NetworkConfig;
use peerchat_types::{PeerchatError, Result};

/// Name of the encrypted node key file inside the data directory.
pub const KEY_FILE_NAME: &str = "private-key.key";

/// Name of the message database inside the data directory.
pub const DB_FILE_NAME: &str = "chat.db";

const DEFAULT_API_ADDR: &str = "127.0.0.1:0";

/// Fully resolved daemon configuration.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub api_listen_addr: String,
    pub network: NetworkConfig,
}

impl DaemonConfig {
    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join(KEY_FILE_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}

/// Parsed command-line flags.
#[derive(Default)]
pub struct CliArgs {
    pub use_public_bootstraps: bool,
    pub dht_protocol_id: Option<String>,
    pub discovery_service_id: Option<String>,
    pub enable_mdns: Option<bool>,
    pub mdns_service_tag: Option<String>,
    pub api_listen_addr: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl CliArgs {
    /// Parses `std::env::args`. Exits on `--help` or an unknown flag.
    pub fn parse_from_env() -> Self {
        Self::parse(std::env::args().skip(1)).unwrap_or_else(|e| {
            eprintln!("{e}");
            eprintln!("use --help for usage information");
            std::process::exit(1);
        })
    }

    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut cli = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--pub" => cli.use_public_bootstraps = true,
                "--dhtproto" => cli.dht_protocol_id = Some(take_value(&mut args, "--dhtproto")?),
                "--discoverysvc" => {
                    cli.discovery_service_id = Some(take_value(&mut args, "--discoverysvc")?)
                }
                "--mdns" => cli.enable_mdns = Some(true),
                "--no-mdns" => cli.enable_mdns = Some(false),
                "--mdnstag" => cli.mdns_service_tag = Some(take_value(&mut args, "--mdnstag")?),
                "--api" => cli.api_listen_addr = Some(take_value(&mut args, "--api")?),
                "--data-dir" => {
                    cli.data_dir = Some(PathBuf::from(take_value(&mut args, "--data-dir")?))
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    return Err(PeerchatError::InvalidInput {
                        reason: format!("unknown argument: {other}"),
                    })
                }
            }
        }
        Ok(cli)
    }
}

/// Resolves flags into a full configuration, creating the data
/// directory if needed.
pub fn load(cli: &CliArgs) -> Result<DaemonConfig> {
    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => {
            let dirs = ProjectDirs::from("", "", "p2p-chat-daemon").ok_or_else(|| {
                PeerchatError::InvalidInput {
                    reason: "could not determine user config directory".into(),
                }
            })?;
            dirs.config_dir().to_path_buf()
        }
    };

    std::fs::create_dir_all(&data_dir).map_err(|e| PeerchatError::PersistenceFailure {
        reason: format!(
            "could not create app data directory {}: {e}",
            data_dir.display()
        ),
    })?;

    let bootstrap_peers = if cli.use_public_bootstraps {
        tracing::info!("using public bootstrap peers");
        parse_multiaddrs(PUBLIC_BOOTSTRAP_NODES)
    } else {
        tracing::info!("using private bootstrap peers");
        parse_multiaddrs(DEFAULT_BOOTSTRAP_NODES)
    };
    if bootstrap_peers.is_empty() {
        return Err(PeerchatError::InvalidInput {
            reason: "no valid bootstrap peers".into(),
        });
    }

    let defaults = NetworkConfig::default();
    let network = NetworkConfig {
        bootstrap_peers,
        use_public_bootstraps: cli.use_public_bootstraps,
        dht_protocol_id: cli
            .dht_protocol_id
            .clone()
            .unwrap_or(defaults.dht_protocol_id),
        discovery_service_id: cli
            .discovery_service_id
            .clone()
            .unwrap_or(defaults.discovery_service_id),
        enable_mdns: cli.enable_mdns.unwrap_or(defaults.enable_mdns),
        mdns_service_tag: cli
            .mdns_service_tag
            .clone()
            .unwrap_or(defaults.mdns_service_tag),
        listen_addrs: defaults.listen_addrs,
    };
    network.validate()?;

    Ok(DaemonConfig {
        data_dir,
        api_listen_addr: cli
            .api_listen_addr
            .clone()
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        network,
    })
}

fn take_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next().ok_or_else(|| PeerchatError::InvalidInput {
        reason: format!("{flag} requires a value"),
    })
}

fn print_help() {
    println!("peerchat-daemon — peer-to-peer chat daemon");
    println!();
    println!("USAGE: peerchat-daemon [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  --pub                  Use public bootstrap nodes");
    println!("  --dhtproto <ID>        DHT protocol ID (default /p2p-chat-daemon/kad/1.0.0)");
    println!("  --discoverysvc <NAME>  DHT discovery service name (default p2p-chat-daemon)");
    println!("  --mdns / --no-mdns     Toggle mDNS local discovery (default on)");
    println!("  --mdnstag <TAG>        mDNS service tag (default p2p-chat-daemon.local)");
    println!("  --api <ADDR>           API listen address (default 127.0.0.1:0)");
    println!("  --data-dir <PATH>      Override the app data directory");
    println!("  --help                 Show this help");
}
