//! Driver runs the blocking consumer session behind the async channels

use std::io::Read;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::EventFrame;
use crate::Result;
use crate::layout::StructureDescriptor;
use crate::session::ConsumerSession;

/// Result of spawning the reader task
pub struct DriverChannels {
    /// Every event, in order; `None` when lossless delivery is off
    pub events: Option<mpsc::Receiver<EventFrame>>,
    /// Most recent event
    pub latest: watch::Receiver<Option<EventFrame>>,
    /// Layout the frames are decoded into
    pub layout: Arc<StructureDescriptor>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    /// Resolves to the number of events read once the session ends
    pub task: JoinHandle<Result<u64>>,
}

/// Driver spawns the reader task for a set-up consumer session
///
/// The session does blocking reads, so the task runs on the blocking pool.
/// Give socket sessions a read timeout so cancellation is noticed while the
/// producer is idle.
pub struct Driver;

impl Driver {
    /// Spawn the reader task. Must be called from within a tokio runtime.
    ///
    /// With a buffer, a full channel holds the reader back until the stream is
    /// polled, the receiver is dropped or the task is cancelled.
    pub fn spawn<R>(session: ConsumerSession<R>, buffer: Option<usize>) -> DriverChannels
    where
        R: Read + Send + 'static,
    {
        let (events_tx, events_rx) = match buffer {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let (latest_tx, latest_rx) = watch::channel(None);
        let layout = Arc::new(session.layout().clone());
        let cancel = CancellationToken::new();

        let task = {
            let layout = Arc::clone(&layout);
            let cancel = cancel.clone();
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || {
                Self::reader_task(session, layout, events_tx, latest_tx, cancel, runtime)
            })
        };

        DriverChannels { events: events_rx, latest: latest_rx, layout, cancel, task }
    }

    fn reader_task<R: Read>(
        mut session: ConsumerSession<R>,
        layout: Arc<StructureDescriptor>,
        mut events_tx: Option<mpsc::Sender<EventFrame>>,
        latest_tx: watch::Sender<Option<EventFrame>>,
        cancel: CancellationToken,
        runtime: Handle,
    ) -> Result<u64> {
        info!(layout = layout.name(), file = session.file_name(), "Reader task started");

        loop {
            if cancel.is_cancelled() {
                info!("Reader cancelled");
                break;
            }

            let fetched = session.fetch_event().map(|event| event.is_some());
            let frame = match fetched {
                Ok(true) => {
                    EventFrame::new(session.event(), &layout, session.sort_key(), session.raw(), session.events_read())
                }
                Ok(false) => {
                    info!(
                        events = session.events_read(),
                        reason = session.close_reason().unwrap_or("done"),
                        "Event stream ended"
                    );
                    break;
                }
                // Read timeout, go round and check for cancellation
                Err(err) if err.is_retryable() => continue,
                Err(err) => {
                    error!(error = %err, events = session.events_read(), "Reader failed");
                    return Err(err);
                }
            };
            trace!(sequence = frame.sequence(), "Event decoded");

            if let Some(tx) = &events_tx {
                // A full buffer waits for the consumer, but never past cancellation.
                let delivered = runtime.block_on(async {
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        sent = tx.send(frame.clone()) => Some(sent.is_ok()),
                    }
                });
                match delivered {
                    None => {
                        info!("Reader cancelled while the event buffer was full");
                        break;
                    }
                    Some(false) => {
                        debug!("Event receiver dropped, continuing with latest only");
                        events_tx = None;
                    }
                    Some(true) => {}
                }
            }
            latest_tx.send_replace(Some(frame));
        }

        Ok(session.events_read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::{ProducerOptions, ProducerSession, StreamSink};
    use crate::test_utils::sample_descriptor;
    use std::io::Cursor;
    use std::time::Duration;

    fn recorded_session(events: u32) -> ConsumerSession<Cursor<Vec<u8>>> {
        let d = sample_descriptor();
        let mut producer =
            ProducerSession::new(StreamSink::new(Vec::new()), d.clone(), ProducerOptions::default()).unwrap();
        for i in 0..events {
            let mut event = producer.new_event();
            event.set(&d, "A", 0, i as i32).unwrap();
            producer.write_event(&event, &[], &[]).unwrap();
        }
        producer.close().unwrap();
        let bytes = producer.into_sink().into_inner();
        ConsumerSession::from_reader(Cursor::new(bytes), SessionConfig::default(), None).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_releases_a_reader_blocked_on_a_full_buffer() {
        let channels = Driver::spawn(recorded_session(100), Some(1));
        // Keep the receiver alive but never poll it.
        let _events = channels.events;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!channels.task.is_finished());

        channels.cancel.cancel();
        let read = tokio::time::timeout(Duration::from_secs(5), channels.task)
            .await
            .expect("reader did not notice cancellation")
            .unwrap()
            .unwrap();
        assert!(read < 100);
    }
}
