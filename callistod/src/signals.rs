// Process signal wiring.
//
// SIGHUP starts a new output file. SIGTERM and SIGINT request a graceful
// shutdown; a second one exits immediately.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use callisto_core::{Command, CommandFlags};

#[cfg(unix)]
pub fn spawn(flags: Arc<CommandFlags>, cancel: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = hangup.recv() => {
                    info!("caught SIGHUP, starting new file");
                    flags.request(Command::Start);
                    continue;
                }
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
            };
            if cancel.is_cancelled() {
                warn!(signal = name, "failed to die cleanly, data loss possible");
                std::process::exit(1);
            }
            info!(signal = name, "caught signal, terminating");
            cancel.cancel();
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn(_flags: Arc<CommandFlags>, cancel: CancellationToken) -> std::io::Result<()> {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if cancel.is_cancelled() {
                warn!("failed to die cleanly, data loss possible");
                std::process::exit(1);
            }
            info!("caught Ctrl+C, terminating");
            cancel.cancel();
        }
    });
    Ok(())
}
