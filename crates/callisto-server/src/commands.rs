//! Command line handling, independent of the socket.

use callisto_core::flags::CommandFlags;
use callisto_core::types::Command;
use callisto_device::SweepReader;
use tracing::info;

/// Prefixes that identify a web client rather than an operator.
const HTTP_PREFIXES: [&str; 8] = [
    "get", "put", "post", "head", "connect", "trace", "options", "delete",
];

/// What to send back for one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Close the connection after sending.
    pub close: bool,
}

impl Reply {
    fn keep(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            close: false,
        }
    }

    fn close(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            close: true,
        }
    }
}

/// Shared state the commands act on.
#[derive(Clone)]
pub struct CommandContext {
    pub flags: std::sync::Arc<CommandFlags>,
    pub sweeps: SweepReader,
    /// Channel frequencies in MHz, in sweep order.
    pub frequencies: std::sync::Arc<[f64]>,
}

impl CommandContext {
    /// Handle one line, already stripped of its line terminator.
    pub fn handle(&self, line: &str) -> Reply {
        let command = line.to_ascii_lowercase();
        match command.as_str() {
            "" => Reply::keep("OK\n\n"),
            "quit" => Reply::close("OK closing connection\n\n"),
            "start" => {
                self.flags.request(Command::Start);
                info!("recording (re)started by command server");
                Reply::keep("OK starting new FITS file\n\n")
            }
            "stop" => {
                self.flags.request(Command::Stop);
                info!("recording stopped by command server");
                Reply::keep("OK stopping\n\n")
            }
            "overview" => {
                self.flags.request(Command::Overview);
                info!("overview started by command server");
                Reply::keep("OK starting spectral overview\n\n")
            }
            "get" => Reply::keep(self.latest_sweep()),
            other if HTTP_PREFIXES.iter().any(|p| other.starts_with(p)) || other.contains(':') => {
                Reply::close("ERROR No HTTP allowed\n\n")
            }
            other => Reply::keep(format!("ERROR unrecognized command ({other})\n\n")),
        }
    }

    fn latest_sweep(&self) -> String {
        let Some(sweep) = self.sweeps.latest() else {
            return "ERROR no data (yet)\n\n".to_string();
        };
        let mut out = format!(
            "OK\nt={}.{:06}\n",
            sweep.timestamp_us / 1_000_000,
            sweep.timestamp_us % 1_000_000
        );
        for (i, value) in sweep.values.iter().enumerate() {
            let freq = self.frequencies.get(i).copied().unwrap_or_default();
            out.push_str(&format!("ch{:03}={freq:.3}:{value}\n", i + 1));
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callisto_device::buffers::buffer_pair;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context() -> (CommandContext, callisto_device::buffers::Producer) {
        let (producer, _consumer, sweeps) =
            buffer_pair(8, 2, 250_000, CancellationToken::new()).unwrap();
        let ctx = CommandContext {
            flags: Arc::new(CommandFlags::new()),
            sweeps,
            frequencies: Arc::from(vec![45.0, 45.0626]),
        };
        (ctx, producer)
    }

    #[test]
    fn simple_commands() {
        let (ctx, _p) = context();
        assert_eq!(ctx.handle(""), Reply::keep("OK\n\n"));
        assert_eq!(ctx.handle("QUIT"), Reply::close("OK closing connection\n\n"));
        assert_eq!(ctx.handle("Start").text, "OK starting new FITS file\n\n");
        assert_eq!(ctx.handle("stop").text, "OK stopping\n\n");
        assert_eq!(ctx.handle("overview").text, "OK starting spectral overview\n\n");
        assert!(ctx.flags.take(Command::Start));
        assert!(ctx.flags.take(Command::Stop));
        assert!(ctx.flags.take(Command::Overview));
    }

    #[test]
    fn http_is_refused() {
        let (ctx, _p) = context();
        for line in ["GET / HTTP/1.1", "post /x", "Host: example.org", "options *"] {
            assert_eq!(ctx.handle(line), Reply::close("ERROR No HTTP allowed\n\n"), "{line}");
        }
    }

    #[test]
    fn unknown_command_is_echoed_lowercased() {
        let (ctx, _p) = context();
        assert_eq!(
            ctx.handle("Frobnicate"),
            Reply::keep("ERROR unrecognized command (frobnicate)\n\n")
        );
    }

    #[test]
    fn get_without_data() {
        let (ctx, _p) = context();
        assert_eq!(ctx.handle("get").text, "ERROR no data (yet)\n\n");
    }

    #[tokio::test]
    async fn get_reports_last_complete_sweep() {
        let (ctx, mut producer) = context();
        for value in [1u8, 2, 3, 4, 5] {
            producer.store(value);
        }
        let text = ctx.handle("get").text;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("OK"));
        let t = lines.next().unwrap();
        assert!(t.starts_with("t="), "{t}");
        assert_eq!(t.split('.').nth(1).map(str::len), Some(6));
        assert_eq!(lines.next(), Some("ch001=45.000:3"));
        assert_eq!(lines.next(), Some("ch002=45.063:4"));
        assert_eq!(lines.next(), Some(""));
        assert!(text.ends_with("\n\n"));
    }
}
