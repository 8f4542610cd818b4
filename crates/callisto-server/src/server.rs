//! TCP listener and per-client tasks.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use callisto_core::error::{Error, Result};

use crate::commands::CommandContext;

/// Longest accepted command line, including its line feed.
pub const MAX_LINE: usize = 127;

/// Consecutive accept failures tolerated before giving up.
pub const MAX_ACCEPT_ERRORS: u32 = 10;

/// A bound command server.
pub struct CommandServer {
    listener: TcpListener,
    context: CommandContext,
    cancel: CancellationToken,
}

impl CommandServer {
    /// Bind the listening socket.
    ///
    /// `cancel` stops the server and its clients; the server cancels it
    /// itself when accepting keeps failing.
    pub async fn bind(
        addr: SocketAddr,
        context: CommandContext,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::Startup(format!("cannot bind command server to {addr}: {e}"))
        })?;
        Ok(CommandServer {
            listener,
            context,
            cancel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop in a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept clients until cancelled.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "command server listening");
        }
        let mut errors = 0u32;
        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    errors = 0;
                    debug!(%peer, "command client connected");
                    let context = self.context.clone();
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, context, cancel).await {
                            debug!(%peer, error = %e, "command client failed");
                        }
                        debug!(%peer, "command client disconnected");
                    });
                }
                Err(e) => {
                    errors += 1;
                    error!(error = %e, "accept failed");
                    if errors > MAX_ACCEPT_ERRORS {
                        error!("too many consecutive accept errors, shutting down");
                        self.cancel.cancel();
                        break;
                    }
                }
            }
        }
        debug!("command server stopped");
    }
}

async fn serve_client(
    stream: TcpStream,
    context: CommandContext,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    writer
        .write_all(format!("e-Callisto for Unix {}\n", env!("CARGO_PKG_VERSION")).as_bytes())
        .await?;

    let mut line = Vec::with_capacity(MAX_LINE);
    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE as u64);
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = limited.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            warn!("command line too long");
            writer.write_all(b"ERROR line too long, closing connection\n").await?;
            break;
        }
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        let reply = context.handle(&String::from_utf8_lossy(&line));
        writer.write_all(reply.text.as_bytes()).await?;
        if reply.close {
            break;
        }
    }
    writer.shutdown().await
}
