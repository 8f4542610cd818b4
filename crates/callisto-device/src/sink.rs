//! Sink interfaces and the drain task.
//!
//! The engine knows nothing about file formats. Completed buffers reach a
//! [`BufferSink`] through the drain task, which runs the (blocking) write on
//! tokio's blocking pool and releases the hand-off afterwards. Overview
//! reports are rare and small and go straight to an [`OverviewSink`] from the
//! control loop.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use callisto_core::error::Result;

use crate::buffers::{CompletedBuffer, Consumer};
use crate::overview::OverviewReport;

/// How often the drain task looks at the hand-off cell.
pub const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Persists completed sample buffers.
pub trait BufferSink: Send + 'static {
    fn write(&mut self, buffer: &CompletedBuffer) -> Result<()>;
}

/// Persists finished overview reports.
pub trait OverviewSink: Send {
    fn write_overview(&mut self, report: &OverviewReport) -> Result<()>;
}

/// Discards overview reports.
#[derive(Debug, Default)]
pub struct NullOverviewSink;

impl OverviewSink for NullOverviewSink {
    fn write_overview(&mut self, report: &OverviewReport) -> Result<()> {
        debug!(points = report.points.len(), "overview discarded");
        Ok(())
    }
}

/// Spawn the drain task.
///
/// The task keeps draining until `stop` is cancelled and no hand-off is
/// outstanding, so a final flush issued before cancellation is written.
/// Sink errors are logged and the buffer is released anyway.
pub fn spawn_drain<S: BufferSink>(
    consumer: Consumer,
    sink: S,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(drain_loop(consumer, sink, stop))
}

async fn drain_loop<S: BufferSink>(consumer: Consumer, mut sink: S, stop: CancellationToken) {
    loop {
        if let Some(buffer) = consumer.poll() {
            if buffer.sweeps() == 0 {
                debug!(samples = buffer.data.len(), "skipping buffer without a complete sweep");
            } else {
                let written = tokio::task::spawn_blocking(move || {
                    let result = sink.write(&buffer);
                    (sink, result)
                })
                .await;
                match written {
                    Ok((returned, result)) => {
                        sink = returned;
                        if let Err(e) = result {
                            error!(error = %e, "cannot write buffer");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "sink task failed, stopping drain");
                        consumer.complete();
                        return;
                    }
                }
            }
            consumer.complete();
            continue;
        }

        if stop.is_cancelled() {
            debug!("drain task finished");
            return;
        }
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(DRAIN_POLL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::buffer_pair;
    use callisto_core::error::Error;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        written: Arc<Mutex<Vec<CompletedBuffer>>>,
        fail: bool,
    }

    impl BufferSink for Recorder {
        fn write(&mut self, buffer: &CompletedBuffer) -> Result<()> {
            self.written.lock().unwrap().push(buffer.clone());
            if self.fail {
                Err(Error::Sink("disk full".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn drain_writes_and_releases() {
        let (mut producer, consumer, _) =
            buffer_pair(4, 2, 1, CancellationToken::new()).unwrap();
        let recorder = Recorder::default();
        let stop = CancellationToken::new();
        let task = spawn_drain(consumer, recorder.clone(), stop.clone());

        for value in 0..8u8 {
            if producer.store(value) {
                producer.swap().await;
            }
        }
        assert!(producer.wait_idle(Some(Duration::from_secs(5))).await);
        stop.cancel();
        task.await.unwrap();

        let written = recorder.written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].data, vec![0, 1, 2, 3]);
        assert_eq!(written[1].data, vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn failed_write_still_releases() {
        let (mut producer, consumer, _) =
            buffer_pair(2, 2, 1, CancellationToken::new()).unwrap();
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let stop = CancellationToken::new();
        let task = spawn_drain(consumer, recorder.clone(), stop.clone());

        producer.store(1);
        assert!(producer.store(2));
        producer.swap().await;
        assert!(producer.wait_idle(Some(Duration::from_secs(5))).await);
        stop.cancel();
        task.await.unwrap();
        assert_eq!(recorder.written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_sweep_is_not_written() {
        let (mut producer, consumer, _) =
            buffer_pair(4, 2, 1, CancellationToken::new()).unwrap();
        let recorder = Recorder::default();
        let stop = CancellationToken::new();
        let task = spawn_drain(consumer, recorder.clone(), stop.clone());

        producer.store(1);
        assert!(producer.flush(Some(Duration::from_secs(5))).await);
        stop.cancel();
        task.await.unwrap();
        assert!(recorder.written.lock().unwrap().is_empty());
    }
}
