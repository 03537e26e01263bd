//! Async handle over a consumer session

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::driver::Driver;
use super::{EventFrame, ThrottleExt};
use crate::config::SessionConfig;
use crate::layout::StructureDescriptor;
use crate::session::ConsumerSession;
use crate::types::UpdateRate;
use crate::{EvwireError, Result};

/// How a subscription delivers events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    /// Keep every event for [`Subscription::events`]. With this off only the
    /// latest event is kept.
    pub lossless: bool,
    /// Events buffered before the reader waits for the stream to be polled.
    pub buffer: usize,
    /// Socket read timeout; bounds how long cancellation can go unnoticed.
    pub read_timeout_ms: u64,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self { lossless: true, buffer: 1024, read_timeout_ms: 100 }
    }
}

impl SubscriptionOptions {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

/// Stream of decoded events from one producer.
///
/// Dropping the subscription cancels the reader task.
pub struct Subscription {
    events: Option<mpsc::Receiver<EventFrame>>,
    latest: watch::Receiver<Option<EventFrame>>,
    layout: Arc<StructureDescriptor>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<u64>>>,
}

impl Subscription {
    /// Connect to a server and complete setup.
    ///
    /// Connection and setup run on the blocking pool; the subscription is
    /// returned once the layouts have been matched.
    pub async fn connect(
        addr: SocketAddr,
        config: SessionConfig,
        layout: Option<StructureDescriptor>,
        options: SubscriptionOptions,
    ) -> Result<Self> {
        info!(%addr, "Opening subscription");
        let session = tokio::task::spawn_blocking(move || -> Result<ConsumerSession> {
            let session = ConsumerSession::connect(addr, config, layout)?;
            session.set_read_timeout(Some(options.read_timeout()))?;
            Ok(session)
        })
        .await
        .map_err(|e| EvwireError::Task { details: e.to_string() })??;
        Ok(Self::spawn_with(session, options))
    }

    /// Wrap a session that has completed setup, with default options.
    pub fn spawn<R: Read + Send + 'static>(session: ConsumerSession<R>) -> Self {
        Self::spawn_with(session, SubscriptionOptions::default())
    }

    pub fn spawn_with<R: Read + Send + 'static>(session: ConsumerSession<R>, options: SubscriptionOptions) -> Self {
        let channels = Driver::spawn(session, options.lossless.then_some(options.buffer));
        Self {
            events: channels.events,
            latest: channels.latest,
            layout: channels.layout,
            cancel: channels.cancel,
            task: Some(channels.task),
        }
    }

    /// Every event in order. Available once, and only for lossless subscriptions.
    pub fn events(&mut self) -> Option<impl Stream<Item = EventFrame> + Send + 'static> {
        self.events.take().map(ReceiverStream::new)
    }

    /// The latest event, delivered at most at `rate`.
    ///
    /// Yields the current event (if any) first; intermediate events may be skipped.
    pub fn latest(&self, rate: UpdateRate) -> impl Stream<Item = EventFrame> + Send + 'static {
        let frames = WatchStream::new(self.latest.clone()).filter_map(|frame| async move { frame });
        match rate.throttle_interval() {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }

    /// Most recent event, if one arrived.
    pub fn current(&self) -> Option<EventFrame> {
        self.latest.borrow().clone()
    }

    pub fn layout(&self) -> &StructureDescriptor {
        &self.layout
    }

    /// Ask the reader task to stop after the current read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the reader task and return how many events it read.
    pub async fn finish(mut self) -> Result<u64> {
        let Some(task) = self.task.take() else {
            return Ok(0);
        };
        task.await.map_err(|e| EvwireError::Task { details: e.to_string() })?
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("Dropping subscription");
        self.cancel.cancel();
    }
}
