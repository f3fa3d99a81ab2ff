//! Socket line sources
//!
//! Receives log lines over a unix or TCP socket, for setups where the
//! MTA host ships logs instead of sharing a filesystem. Accepted
//! connections are read sequentially until cancellation.

use super::file::feed_lines;
use postwatch_common::{Error, Result};
use std::path::PathBuf;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSpec {
    Unix(PathBuf),
    Tcp(String),
}

impl SocketSpec {
    /// Parses `unix=/some/path` or `tcp=host:port`
    pub fn parse(spec: &str) -> Result<SocketSpec> {
        match spec.split_once('=') {
            Some(("unix", path)) if !path.is_empty() => Ok(SocketSpec::Unix(PathBuf::from(path))),
            Some(("tcp", addr)) if !addr.is_empty() => Ok(SocketSpec::Tcp(addr.to_owned())),
            _ => Err(Error::Config(format!(
                "invalid socket specification {:?}; expected unix=<path> or tcp=<addr>",
                spec
            ))),
        }
    }
}

pub async fn serve(
    spec: SocketSpec,
    lines_tx: mpsc::Sender<Vec<u8>>,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    match spec {
        SocketSpec::Unix(path) => {
            // a previous unclean shutdown leaves the socket file behind
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            info!(path = %path.display(), "listening for log lines on unix socket");

            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            if let Err(e) = feed_lines(stream, &lines_tx).await {
                                warn!(error = %e, "error reading log connection");
                            }
                        }
                        Err(e) => warn!(error = %e, "error accepting log connection"),
                    },
                    _ = cancel.changed() => {
                        let _ = std::fs::remove_file(&path);
                        return Ok(());
                    }
                }
            }
        }
        SocketSpec::Tcp(addr) => {
            let listener = TcpListener::bind(&addr).await?;
            info!(%addr, "listening for log lines on tcp socket");

            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            if let Err(e) = feed_lines(stream, &lines_tx).await {
                                warn!(error = %e, "error reading log connection");
                            }
                        }
                        Err(e) => warn!(error = %e, "error accepting log connection"),
                    },
                    _ = cancel.changed() => return Ok(()),
                }
            }
        }
    }
}
