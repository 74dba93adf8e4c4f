//! MQTT delivery via rumqttc.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::{PublishError, Publisher};
use crate::aggregate::Batch;
use crate::config::MqttConfig;

/// Pause before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the client's request queue.
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Connected,
    Failed(String),
    Closed,
}

/// Publishes batches to a single MQTT topic.
///
/// The rumqttc event loop runs in a background task that tracks the
/// connection state and reconnects after errors.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    retain: bool,
    timeout: Duration,
    state: watch::Receiver<ConnectionState>,
    poller: JoinHandle<()>,
}

impl MqttPublisher {
    /// Connect to the broker, waiting at most `connect_timeout_secs` for ConnAck.
    ///
    /// An unreachable broker is not fatal: the publisher is returned with the
    /// event loop still reconnecting in the background, and `publish` reports
    /// `NotConnected` until a ConnAck arrives.
    pub async fn connect(config: &MqttConfig) -> Result<Self, PublishError> {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.ip.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.user.is_empty() {
            options.set_credentials(config.user.clone(), config.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (state_tx, mut state_rx) = watch::channel(ConnectionState::Connecting);
        let poller = tokio::spawn(drive(eventloop, state_tx));

        let connect_timeout = config.connect_timeout();
        let connected = timeout(
            connect_timeout,
            state_rx.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .map(|waited| waited.is_ok());

        match connected {
            Ok(true) => crate::log_event!(
                "mqtt",
                "connected",
                "{}:{} as {}",
                config.ip,
                config.port,
                config.client_id
            ),
            Ok(false) => {
                poller.abort();
                return Err(PublishError::Connect {
                    reason: "event loop stopped".to_string(),
                });
            }
            Err(_) => {
                let last = state_rx.borrow().clone();
                let error = match last {
                    ConnectionState::Failed(reason) => PublishError::Connect { reason },
                    _ => PublishError::ConnectTimeout,
                };
                tracing::warn!(
                    "[mqtt] broker {}:{} unreachable at startup, retrying in background: {error}",
                    config.ip,
                    config.port
                );
            }
        }

        Ok(Self {
            client,
            topic: config.topic.clone(),
            qos: qos_from_level(config.qos),
            retain: config.retain,
            timeout: connect_timeout,
            state: state_rx,
            poller,
        })
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn publish(&mut self, batch: &Batch) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        let payload = batch.to_payload()?;
        let size = payload.len();

        match timeout(
            self.timeout,
            self.client
                .publish(self.topic.clone(), self.qos, self.retain, payload),
        )
        .await
        {
            Ok(Ok(())) => {
                crate::debug_event!("mqtt", "published", "{size} bytes to {}", self.topic);
                Ok(())
            }
            Ok(Err(e)) => Err(PublishError::Send {
                reason: e.to_string(),
            }),
            Err(_) => Err(PublishError::Timeout),
        }
    }

    async fn disconnect(&mut self) {
        match timeout(self.timeout, self.client.disconnect()).await {
            Ok(Ok(())) => {
                // Let the event loop flush the DISCONNECT packet
                let _ = timeout(self.timeout, &mut self.poller).await;
                crate::log_event!("mqtt", "disconnected");
            }
            Ok(Err(e)) => tracing::warn!("[mqtt] disconnect failed: {e}"),
            Err(_) => tracing::warn!("[mqtt] disconnect timed out"),
        }
        self.poller.abort();
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// Poll the event loop forever, publishing connection state changes.
async fn drive(mut eventloop: EventLoop, state: watch::Sender<ConnectionState>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                state.send_replace(ConnectionState::Connected);
                crate::debug_event!("mqtt", "connack");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                state.send_replace(ConnectionState::Closed);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[mqtt] connection error: {e}");
                state.send_replace(ConnectionState::Failed(e.to_string()));
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_not_fatal() {
        use crate::aggregate::OpenBatch;
        use crate::config::MatchMode;
        use crate::watcher::{Operation, RawEvent, WatchRegistry};

        // Bind and drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MqttConfig {
            port,
            connect_timeout_secs: 1,
            ..MqttConfig::default()
        };

        let mut publisher = MqttPublisher::connect(&config).await.unwrap();
        assert!(!publisher.poller.is_finished());

        let registry =
            WatchRegistry::from_entries(vec![("movies", vec!["/m"])], MatchMode::Segment).unwrap();
        let batch = OpenBatch::new(&registry, RawEvent::new("/m/a.mkv", Operation::Create)).close();
        let result = publisher.publish(&batch).await;
        assert!(matches!(result, Err(PublishError::NotConnected)));
    }
}
