// file: src/network/ssh.rs
// version: 2.0.0
// guid: t0u1v2w3-x4y5-6789-0123-456789tuvwxy

//! SSH client for guest provisioning commands

use crate::{error::CloudImageError, Result};
use ssh2::Session;
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSH client for remote operations
pub struct SshClient {
    session: Option<Session>,
    host: String,
}

impl SshClient {
    /// Create a new SSH client
    pub fn new() -> Self {
        Self {
            session: None,
            host: String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Connect to remote host via SSH
    ///
    /// Password authentication is used when a password is given, otherwise the
    /// local SSH agent.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        username: &str,
        password: Option<&str>,
    ) -> Result<()> {
        info!("Connecting to {}:{} as {}", host, port, username);

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| CloudImageError::SshError(format!("Failed to resolve {}: {}", host, e)))?;
        let tcp = connect_any(addrs).map_err(|e| {
            CloudImageError::SshError(format!("Failed to connect to {}:{}: {}", host, port, e))
        })?;

        let mut session = Session::new().map_err(|e| {
            CloudImageError::SshError(format!("Failed to create SSH session: {}", e))
        })?;

        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| CloudImageError::SshError(format!("SSH handshake failed: {}", e)))?;

        let auth = match password {
            Some(password) => session.userauth_password(username, password),
            None => session.userauth_agent(username),
        };
        if let Err(e) = auth {
            return Err(CloudImageError::SshError(format!(
                "SSH authentication as {} failed: {}",
                username, e
            )));
        }

        if !session.authenticated() {
            return Err(CloudImageError::SshError(
                "SSH authentication failed".to_string(),
            ));
        }

        self.session = Some(session);
        self.host = host.to_string();

        info!("SSH connection established to {}", host);
        Ok(())
    }

    /// Execute command and return output
    pub async fn execute_with_output(&mut self, command: &str) -> Result<String> {
        debug!("Executing command with output: {}", command);

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CloudImageError::SshError("No active SSH session".to_string()))?;

        let mut channel = session.channel_session().map_err(|e| {
            CloudImageError::SshError(format!("Failed to create SSH channel: {}", e))
        })?;

        channel.exec(command).map_err(|e| CloudImageError::RemoteCommandError {
            command: command.to_string(),
            reason: format!("exec failed: {}", e),
        })?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel.read_to_string(&mut stdout).map_err(|e| {
            CloudImageError::SshError(format!("Failed to read stdout: {}", e))
        })?;
        channel.stderr().read_to_string(&mut stderr).map_err(|e| {
            CloudImageError::SshError(format!("Failed to read stderr: {}", e))
        })?;

        channel.wait_close().map_err(|e| {
            CloudImageError::SshError(format!("Failed to close SSH channel: {}", e))
        })?;

        let exit_status = channel.exit_status().map_err(|e| {
            CloudImageError::SshError(format!("Failed to get exit status: {}", e))
        })?;

        if exit_status != 0 {
            warn!("Command failed with exit code {}", exit_status);
            if !stderr.trim().is_empty() {
                debug!("STDERR: {}", stderr);
            }
            return Err(CloudImageError::RemoteCommandError {
                command: command.to_string(),
                reason: format!(
                    "exit status {}: {}",
                    exit_status,
                    if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
                ),
            });
        }

        debug!("Command executed successfully: {} bytes of output", stdout.len());
        Ok(stdout)
    }

    /// Disconnect SSH session
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "", None);
            info!("SSH session to {} disconnected", self.host);
        }
    }
}

/// Try each resolved address in turn, returning the first connection
fn connect_any(addrs: impl IntoIterator<Item = SocketAddr>) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connection to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address resolved")
    }))
}

impl Drop for SshClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Default for SshClient {
    fn default() -> Self {
        Self::new()
    }
}
