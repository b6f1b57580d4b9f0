//! TFTP Daemon - Main executable
//!
//! Serves one directory over TFTP (RFC 1350) until the listening socket fails.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use argh::FromArgs;
use tftp::{FileSystem, TftpServer, TftpServerConfig, TransferConfig};
use tftpd::util::get_interface_ip;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 69;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP server - serve a directory for reading and writing over UDP",
    example = "Serve /srv/tftp on the standard port:\n  {command_name} --root /srv/tftp",
    example = "Unprivileged testing:\n  {command_name} --root ./files --address 127.0.0.1 --port 6969",
    example = "Answer transfers from the address of eth0, never replacing files:\n  {command_name} -r /tftpboot -I eth0 --no-overwrite"
)]
struct CliConfig {
    #[argh(option, short = 'r', description = "directory to serve (default: current directory)")]
    root: Option<PathBuf>,

    #[argh(
        option,
        short = 'a',
        description = "address to listen on",
        default = "DEFAULT_ADDRESS.to_string()"
    )]
    address: String,

    #[argh(option, short = 'p', description = "port to listen on", default = "DEFAULT_PORT")]
    port: u16,

    #[argh(
        option,
        description = "seconds of silence before the last packet is retransmitted",
        default = "DEFAULT_RETRY_INTERVAL_SECS"
    )]
    retry_interval: u64,

    #[argh(
        option,
        description = "seconds to wait for a reply before a transfer is abandoned",
        default = "DEFAULT_TIMEOUT_SECS"
    )]
    timeout: u64,

    #[argh(
        option,
        short = 'I',
        description = "network interface whose IPv4 address transfer sockets use"
    )]
    interface: Option<String>,

    #[argh(switch, description = "refuse write requests for files that already exist")]
    no_overwrite: bool,
}

impl CliConfig {
    fn into_server_config(self) -> Result<(TftpServerConfig, FileSystem)> {
        let ip: IpAddr = self
            .address
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.address))?;

        let root_dir = match self.root {
            Some(root) => root,
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };
        ensure!(root_dir.is_dir(), "TFTP root {} is not a directory", root_dir.display());

        ensure!(self.retry_interval > 0, "Retry interval must be at least one second");
        ensure!(
            self.timeout >= self.retry_interval,
            "Timeout ({}s) must not be shorter than the retry interval ({}s)",
            self.timeout,
            self.retry_interval
        );

        let local_bind = match &self.interface {
            Some(name) => {
                let ip = get_interface_ip(name).with_context(|| format!("Failed to get IP of interface {}", name))?;
                Some(IpAddr::V4(ip))
            }
            None => None,
        };

        let config = TftpServerConfig {
            bind_address: SocketAddr::new(ip, self.port).to_string(),
            transfer_config: TransferConfig {
                root_dir,
                retry_interval: Duration::from_secs(self.retry_interval),
                timeout: Duration::from_secs(self.timeout),
                local_bind,
            },
        };
        let file_system = FileSystem {
            overwrite: !self.no_overwrite,
        };

        Ok((config, file_system))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tftp=info".parse()?)
                .add_directive("tftpd=info".parse()?),
        )
        .init();

    let cli_config: CliConfig = argh::from_env();
    let (config, file_system) = cli_config.into_server_config()?;

    if let Some(ip) = config.transfer_config.local_bind {
        tracing::info!("Transfers will be answered from {}", ip);
    }

    let mut server = TftpServer::with_ports(config, file_system, file_system);
    server.run().await.context("TFTP server stopped")
}
