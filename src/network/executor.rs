// file: src/network/executor.rs
// version: 2.0.0
// guid: exec0001-2345-6789-abcd-ef0123456789

//! Privileged command channel into a provisioned guest

use super::ssh::SshClient;
use crate::{config::TransportProfile, Result};
use async_trait::async_trait;
use tracing::debug;

/// Runs one command at a time inside a guest
#[async_trait]
pub trait RemoteExecutor: Send {
    /// Run `command` to completion; a non-zero exit is an error
    async fn run(&mut self, command: &str) -> Result<String>;
}

/// SSH transport, connected on first use
pub struct SshTransport {
    profile: TransportProfile,
    port: u16,
    client: SshClient,
}

impl SshTransport {
    /// `default_port` is used when the profile does not name one
    pub fn new(profile: TransportProfile, default_port: u16) -> Self {
        let port = profile.port.unwrap_or(default_port);
        Self {
            profile,
            port,
            client: SshClient::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl RemoteExecutor for SshTransport {
    async fn run(&mut self, command: &str) -> Result<String> {
        if !self.client.is_connected() {
            debug!(
                "Opening transport to {}@{}:{}",
                self.profile.username, self.profile.hostname, self.port
            );
            self.client
                .connect(
                    &self.profile.hostname,
                    self.port,
                    &self.profile.username,
                    self.profile.password.as_deref(),
                )
                .await?;
        }

        self.client.execute_with_output(command).await
    }
}
