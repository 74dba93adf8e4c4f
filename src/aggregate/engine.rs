//! Fixed-window event aggregation.
//!
//! The engine cycles through three states:
//!
//! ```text
//! Idle --first event--> Open --window elapsed--> Flushing --published/discarded--> Idle
//! ```
//!
//! The window is anchored to the first event of a batch and is never
//! extended by later events, so notification latency is bounded by one
//! window even under a continuous burst. A burst longer than the window is
//! split across consecutive batches.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::batch::{Batch, OpenBatch};
use crate::config::{BatchingConfig, PublishConfig};
use crate::publish::Publisher;
use crate::watcher::{RawEvent, WatchRegistry};

/// Where the engine is in its batch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No batch; waiting for an event.
    Idle,
    /// Collecting events until the window elapses.
    Open,
    /// Draining queued events and delivering the batch.
    Flushing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Open => "open",
            EngineState::Flushing => "flushing",
        };
        f.write_str(name)
    }
}

/// Counters reported when the engine stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub events_seen: u64,
    pub batches_published: u64,
    pub batches_discarded: u64,
}

/// How a closed batch is delivered.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Attempts before the batch is discarded (at least one).
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
    /// Time an in-flight publish may keep running after shutdown.
    pub shutdown_grace: Duration,
}

impl From<&PublishConfig> for DeliveryPolicy {
    fn from(config: &PublishConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from(&PublishConfig::default())
    }
}

enum Delivery {
    Published,
    Discarded,
    /// Shutdown interrupted delivery.
    Abandoned,
}

/// Turns a stream of raw events into published batches.
pub struct Aggregator<P> {
    registry: Arc<WatchRegistry>,
    publisher: P,
    window: Duration,
    policy: DeliveryPolicy,
    state: EngineState,
    stats: EngineStats,
}

impl<P: Publisher> Aggregator<P> {
    pub fn new(registry: Arc<WatchRegistry>, publisher: P, window: Duration) -> Self {
        Self {
            registry,
            publisher,
            window,
            policy: DeliveryPolicy::default(),
            state: EngineState::Idle,
            stats: EngineStats::default(),
        }
    }

    /// Build from configuration sections.
    pub fn from_config(
        registry: Arc<WatchRegistry>,
        publisher: P,
        batching: &BatchingConfig,
        publish: &PublishConfig,
    ) -> Self {
        Self::new(registry, publisher, batching.window()).with_policy(publish.into())
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run until cancelled or until the event stream ends.
    ///
    /// On cancellation an open batch is dropped, not flushed. When the stream
    /// ends the open batch is flushed first. The publisher is disconnected
    /// before returning.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<RawEvent>,
        cancel: CancellationToken,
    ) -> EngineStats {
        crate::log_event!(
            "engine",
            "started",
            "{}s window, {} libraries",
            self.window.as_secs_f64(),
            self.registry.libraries().len()
        );

        'cycle: loop {
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'cycle,
                next = events.recv() => match next {
                    Some(event) => event,
                    None => break 'cycle,
                },
            };

            self.transition(EngineState::Open);
            self.stats.events_seen += 1;
            crate::log_event!("batch", "opened", "{}", first.path.display());
            let mut batch = OpenBatch::new(&self.registry, first);

            let window = sleep(self.window);
            tokio::pin!(window);
            let mut stream_ended = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        crate::log_event!("batch", "dropped on shutdown", "{} events", batch.len());
                        break 'cycle;
                    }
                    _ = &mut window => break,
                    next = events.recv() => match next {
                        Some(event) => {
                            crate::debug_event!(
                                "batch",
                                "event",
                                "{:?} {}",
                                event.operation,
                                event.path.display()
                            );
                            self.stats.events_seen += 1;
                            batch.attribute(&self.registry, event);
                        }
                        None => {
                            stream_ended = true;
                            break;
                        }
                    },
                }
            }

            self.transition(EngineState::Flushing);
            if !stream_ended {
                stream_ended = self.drain(&mut events, &mut batch);
            }

            let batch = batch.close();
            let touched: Vec<&str> = batch.touched().collect();
            crate::log_event!(
                "batch",
                "closed",
                "{} events, touched [{}]",
                batch.len(),
                touched.join(", ")
            );

            match self.deliver(&batch, &cancel).await {
                Delivery::Published => self.stats.batches_published += 1,
                Delivery::Discarded | Delivery::Abandoned => self.stats.batches_discarded += 1,
            }
            self.transition(EngineState::Idle);

            if stream_ended {
                crate::log_event!("engine", "event stream ended");
                break;
            }
        }

        self.publisher.disconnect().await;
        crate::log_event!(
            "engine",
            "stopped",
            "{} events, {} published, {} discarded",
            self.stats.events_seen,
            self.stats.batches_published,
            self.stats.batches_discarded
        );
        self.stats
    }

    /// Attribute everything already queued, without waiting.
    ///
    /// Returns `true` if the stream has ended. An event that arrives right
    /// after the last check lands in the next batch.
    fn drain(&mut self, events: &mut mpsc::Receiver<RawEvent>, batch: &mut OpenBatch) -> bool {
        let mut drained = 0usize;
        let ended = loop {
            match events.try_recv() {
                Ok(event) => {
                    self.stats.events_seen += 1;
                    batch.attribute(&self.registry, event);
                    drained += 1;
                }
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        crate::debug_event!("batch", "drained", "{drained} queued events");
        ended
    }

    /// Deliver a closed batch under the retry policy.
    async fn deliver(&mut self, batch: &Batch, cancel: &CancellationToken) -> Delivery {
        let name = self.publisher.name().to_string();

        for attempt in 1..=self.policy.max_attempts {
            let result = {
                let publish = self.publisher.publish(batch);
                tokio::pin!(publish);

                tokio::select! {
                    result = &mut publish => result,
                    _ = cancel.cancelled() => {
                        return match timeout(self.policy.shutdown_grace, &mut publish).await {
                            Ok(Ok(())) => {
                                crate::log_event!(name, "published during shutdown");
                                Delivery::Published
                            }
                            Ok(Err(e)) => {
                                tracing::error!("[{name}] publish failed during shutdown: {e}");
                                Delivery::Abandoned
                            }
                            Err(_) => {
                                tracing::warn!("[{name}] publish abandoned on shutdown");
                                Delivery::Abandoned
                            }
                        };
                    }
                }
            };

            match result {
                Ok(()) => {
                    crate::log_event!(name, "published", "{} events", batch.len());
                    return Delivery::Published;
                }
                Err(e) => {
                    tracing::warn!(
                        "[{name}] publish attempt {attempt}/{} failed: {e}",
                        self.policy.max_attempts
                    );
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Delivery::Abandoned,
                    _ = sleep(self.policy.backoff * attempt) => {}
                }
            }
        }

        tracing::error!(
            "[{name}] discarding batch of {} events after {} attempts",
            batch.len(),
            self.policy.max_attempts
        );
        Delivery::Discarded
    }

    fn transition(&mut self, to: EngineState) {
        crate::debug_event!("engine", "state", "{} -> {to}", self.state);
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchMode;
    use crate::publish::LogPublisher;
    use crate::watcher::Operation;

    fn engine() -> Aggregator<LogPublisher> {
        let registry =
            WatchRegistry::from_entries(vec![("movies", vec!["/m"])], MatchMode::Segment).unwrap();
        Aggregator::new(Arc::new(registry), LogPublisher::new(), Duration::from_secs(30))
    }

    #[test]
    fn test_engine_starts_idle() {
        assert_eq!(engine().state(), EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_takes_queued_events_only() {
        let mut engine = engine();
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(RawEvent::new("/m/b", Operation::Write)).await.unwrap();
        tx.send(RawEvent::new("/x/c", Operation::Write)).await.unwrap();

        let mut batch = OpenBatch::new(&engine.registry, RawEvent::new("/m/a", Operation::Create));
        let ended = engine.drain(&mut rx, &mut batch);

        assert!(!ended);
        assert_eq!(batch.len(), 3);
        assert_eq!(engine.stats.events_seen, 2);

        drop(tx);
        assert!(engine.drain(&mut rx, &mut batch));
    }

    #[test]
    fn test_policy_from_config_has_at_least_one_attempt() {
        let config = PublishConfig {
            max_attempts: 0,
            retry_backoff_ms: 250,
            shutdown_grace_ms: 100,
        };
        let policy = DeliveryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff, Duration::from_millis(250));
        assert_eq!(policy.shutdown_grace, Duration::from_millis(100));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Idle.to_string(), "idle");
        assert_eq!(EngineState::Open.to_string(), "open");
        assert_eq!(EngineState::Flushing.to_string(), "flushing");
    }
}
