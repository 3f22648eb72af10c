use std::{path::PathBuf, process::Stdio, time::Duration};

use anyhow::{bail, Context};
use tokio::{
    net::{TcpListener, TcpStream},
    process::{Child, Command},
    time::{sleep, Instant},
};
use tracing::{debug, info};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SshTunnelConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
    pub local_port: u16,
    /// Address of the database as seen from the SSH host.
    pub remote_host: String,
    pub remote_port: u16,
    pub ready_timeout: Duration,
}

impl SshTunnelConfig {
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push("-L".to_string());
        args.push(format!(
            "127.0.0.1:{}:{}:{}",
            self.local_port, self.remote_host, self.remote_port
        ));
        args.push(format!("{}@{}", self.user, self.host));
        args
    }
}

/// Local port forward through the system `ssh` client. The child is killed
/// when the tunnel is dropped.
#[derive(Debug)]
pub struct SshTunnel {
    child: Child,
    local_port: u16,
}

/// Fails when something already listens on `127.0.0.1:<port>`; a connect to
/// that listener would otherwise pass for a ready tunnel.
async fn ensure_port_free(port: u16) -> anyhow::Result<()> {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(err) => bail!("local port {port} is already in use: {err}"),
    }
}

impl SshTunnel {
    pub async fn open(config: &SshTunnelConfig) -> anyhow::Result<Self> {
        ensure_port_free(config.local_port).await?;
        let mut child = Command::new("ssh")
            .args(config.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawning ssh")?;

        let deadline = Instant::now() + config.ready_timeout;
        loop {
            if let Some(status) = child.try_wait().context("polling ssh")? {
                bail!("ssh exited before the tunnel was ready ({status})");
            }
            if TcpStream::connect(("127.0.0.1", config.local_port)).await.is_ok() {
                if let Some(status) = child.try_wait().context("polling ssh")? {
                    bail!("ssh exited while 127.0.0.1:{} answered ({status})", config.local_port);
                }
                break;
            }
            if Instant::now() >= deadline {
                bail!(
                    "ssh tunnel to {} did not open 127.0.0.1:{} within {:?}",
                    config.host,
                    config.local_port,
                    config.ready_timeout
                );
            }
            debug!(port = config.local_port, "waiting for ssh tunnel");
            sleep(READY_POLL_INTERVAL).await;
        }

        info!(host = %config.host, local_port = config.local_port, "ssh tunnel ready");
        Ok(Self {
            child,
            local_port: config.local_port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.child.kill().await.context("stopping ssh tunnel")
    }
}
