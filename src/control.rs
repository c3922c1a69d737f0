//! Switch directive channel.
//!
//! Directives go to the mining coordinator's control port as one JSON
//! object per line. A fresh connection is opened per directive; failures
//! are reported to the caller and never retried here.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::types::{ProfitError, SwitchDirective};

/// Destination for switch directives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectiveSink: Send + Sync {
    async fn send(&self, directive: &SwitchDirective) -> Result<()>;
}

/// Line-delimited JSON over TCP.
pub struct TcpControlClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpControlClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn error(&self, message: impl Into<String>) -> ProfitError {
        ProfitError::Control {
            endpoint: self.endpoint(),
            message: message.into(),
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), ProfitError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    self.error("connection refused; is the coordinator running?")
                } else {
                    self.error(format!("connect failed: {e}"))
                }
            })?;

        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.error(format!("write failed: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| self.error(format!("shutdown failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl DirectiveSink for TcpControlClient {
    async fn send(&self, directive: &SwitchDirective) -> Result<()> {
        let line = directive
            .to_line()
            .map_err(|e| self.error(format!("encode failed: {e}")))?;

        debug!(endpoint = %self.endpoint(), directive = %line.trim_end(), "Sending directive");

        match tokio::time::timeout(self.timeout, self.write_line(&line)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProfitError::Timeout {
                what: format!("control channel {}", self.endpoint()),
                secs: self.timeout.as_secs(),
            }
            .into()),
        }
    }
}
