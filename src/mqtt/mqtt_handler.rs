use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::{BusMessage, MsgManager};

/// Errors kept in [`MqttStatus::error_messages`].
const MAX_ERROR_MESSAGES: usize = 10;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub last_activity: Option<DateTime<Local>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("invalid broker address: {0}")]
    InvalidServer(String),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Subscribe-only broker connection feeding the sync engine.
///
/// Reconnects are left to rumqttc: every poll after an error dials again.
/// Connection problems are reported on the status channel; the engine keeps
/// its last state while the bus is silent.
pub struct MqttHandler {
    status: watch::Sender<MqttStatus>,
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttConfig,
    topics: Vec<String>,
    msg_manager: MsgManager,
}

impl MqttHandler {
    pub fn new(
        config: MqttConfig,
        topics: Vec<String>,
        inbound: mpsc::Sender<BusMessage>,
    ) -> Result<Self, MqttError> {
        let (host, port) = config.server.host_port()?;
        let mut mqtt_options = MqttOptions::new(config.client_id.clone(), host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        if !config.server.user.is_empty() {
            mqtt_options.set_credentials(config.server.user.clone(), config.server.pw.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity.max(1));
        let (status, _) = watch::channel(MqttStatus::default());

        info!(
            "MQTT handler for {} with {} topics",
            config.server.url,
            topics.len()
        );
        Ok(Self {
            status,
            client,
            eventloop,
            config,
            topics,
            msg_manager: MsgManager::new(inbound),
        })
    }

    pub fn status(&self) -> watch::Receiver<MqttStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|status| status.connection_state = state);
    }

    fn record_error(&self, message: String) {
        self.status.send_modify(|status| {
            status.connection_state = ConnectionState::Reconnecting;
            status.error_messages.push(message);
            if status.error_messages.len() > MAX_ERROR_MESSAGES {
                status.error_messages.remove(0);
            }
        });
    }

    async fn subscribe_all(client: &AsyncClient, topics: &[String]) -> Result<(), MqttError> {
        if topics.is_empty() {
            warn!("No topics to subscribe to");
            return Ok(());
        }

        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce));
        client.subscribe_many(filters).await?;
        debug!("Subscribed to {:?}", topics);
        Ok(())
    }

    /// Poll the broker until `cancel` fires or the engine inbox closes.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), MqttError> {
        self.set_state(ConnectionState::Connecting);
        let backoff = Duration::from_millis(self.config.poll_frequency);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("MQTT handler cancelled");
                    break;
                }

                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BusMessage {
                            topic: publish.topic,
                            payload: publish.payload,
                            received_at: Local::now(),
                        };
                        debug!("Received {}", message);
                        self.status.send_modify(|status| {
                            status.messages_received += 1;
                            status.last_activity = Some(message.received_at);
                        });

                        if self.msg_manager.forward(message).await.is_err() {
                            warn!("Sync engine inbox closed, stopping MQTT handler");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to {}", self.config.server.url);
                        // Subscriptions are re-issued on every connect; the
                        // broker may have dropped the session.
                        match Self::subscribe_all(&self.client, &self.topics).await {
                            Ok(()) => self.set_state(ConnectionState::Connected),
                            Err(e) => {
                                error!("Subscribing failed: {}", e);
                                self.record_error(e.to_string());
                                self.set_state(ConnectionState::Failed);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Broker closed the connection");
                        self.set_state(ConnectionState::Disconnected);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        self.record_error(e.to_string());

                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not sent: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }
}
