//! Impure I/O operations for the MQTT session client
//!
//! This module drives the `rumqttc` event loop on a background task and turns
//! its events into session state changes that the async client methods wait on.

use super::connection::{
    configure_mqtt_options, effective_client_id, select_transport, SessionError, SessionState,
    TlsMaterial, REQUEST_CHANNEL_CAPACITY,
};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ConnectionSettings;
use crate::protocol::{validate_topic_filter, validate_topic_name};
use crate::transport::SessionClient;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `end_session` waits for the event loop to flush the DISCONNECT
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Status of the network link as observed by the event loop task
#[derive(Debug, Clone, PartialEq)]
pub enum LinkStatus {
    /// No ConnAck yet
    Pending,
    /// ConnAck received
    Up,
    /// Event loop stopped, with the reason
    Down(String),
}

/// Subscription acknowledgement forwarded from the event loop
#[derive(Debug, Clone, Copy, PartialEq)]
struct SubAckOutcome {
    packet_id: u16,
    granted: bool,
}

/// MQTT session client backed by `rumqttc`
pub struct MqttSessionClient {
    state: SessionState,
    client: Option<AsyncClient>,
    link_rx: Option<watch::Receiver<LinkStatus>>,
    suback_rx: Option<mpsc::UnboundedReceiver<SubAckOutcome>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl MqttSessionClient {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            client: None,
            link_rx: None,
            suback_rx: None,
            event_loop_handle: None,
        }
    }

    fn link_is_up(&self) -> bool {
        self.link_rx
            .as_ref()
            .is_some_and(|rx| *rx.borrow() == LinkStatus::Up)
    }

    /// The client handle, provided the session is connected and its link is up.
    ///
    /// A lost link leaves the state at `Connected`; only `is_connected` drops.
    fn connected_client(&self, operation: &'static str) -> Result<&AsyncClient, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::invalid_state(operation, self.state));
        }
        match &self.client {
            Some(client) if self.link_is_up() => Ok(client),
            _ => Err(SessionError::ConnectionFailed(
                "Connection to broker lost".to_string(),
            )),
        }
    }

    /// Wait for the event loop to report ConnAck or failure
    async fn wait_for_connection_confirmation(
        mut link_rx: watch::Receiver<LinkStatus>,
    ) -> Result<(), SessionError> {
        loop {
            let status = link_rx.borrow_and_update().clone();
            match status {
                LinkStatus::Up => return Ok(()),
                LinkStatus::Down(reason) => return Err(SessionError::ConnectionFailed(reason)),
                LinkStatus::Pending => {}
            }

            if link_rx.changed().await.is_err() {
                return Err(SessionError::ConnectionFailed(
                    "Event loop stopped before ConnAck".to_string(),
                ));
            }
        }
    }

    /// Drive the event loop until the session ends or the link fails.
    ///
    /// There is no reconnection: the first error stops the loop.
    async fn run_event_loop(
        mut event_loop: EventLoop,
        link_tx: watch::Sender<LinkStatus>,
        suback_tx: mpsc::UnboundedSender<SubAckOutcome>,
    ) {
        loop {
            let event = match event_loop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    let connected = *link_tx.borrow() == LinkStatus::Up;
                    if connected {
                        error!("MQTT connection lost: {}", e);
                    } else {
                        debug!(target: "mqtt_transport", "MQTT event loop error before ConnAck: {}", e);
                    }
                    link_tx.send_replace(LinkStatus::Down(e.to_string()));
                    break;
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => {
                    link_tx.send_replace(LinkStatus::Up);
                }
                EventRoute::SubscriptionAcknowledged { packet_id, granted } => {
                    let _ = suback_tx.send(SubAckOutcome { packet_id, granted });
                }
                EventRoute::MessageReceived {
                    topic,
                    payload,
                    retain,
                } => {
                    info!(topic = %topic, retain = retain, "Message received: {}", payload);
                }
                EventRoute::DisconnectedByBroker => {
                    warn!("MQTT broker closed the session");
                    link_tx.send_replace(LinkStatus::Down("Broker disconnected".to_string()));
                    break;
                }
                EventRoute::DisconnectSent => {
                    debug!(target: "mqtt_transport", "DISCONNECT sent, stopping event loop");
                    link_tx.send_replace(LinkStatus::Down("Client disconnected".to_string()));
                    break;
                }
                EventRoute::InfrastructureEvent(description) => {
                    debug!(target: "mqtt_transport", "MQTT event: {}", description);
                }
                EventRoute::OutgoingEvent => {}
            }
        }
    }

    /// Tear down whatever a failed connect left behind
    fn reset_connection(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.client = None;
        self.link_rx = None;
        self.suback_rx = None;
    }

    async fn establish(&mut self, settings: &ConnectionSettings) -> Result<(), SessionError> {
        let tls = if settings.use_tls {
            TlsMaterial::load(settings).await?
        } else {
            TlsMaterial::default()
        };
        let transport = select_transport(settings, tls);
        let client_id = effective_client_id(settings);
        let mqtt_options = configure_mqtt_options(settings, &client_id, transport)?;

        info!(
            host = %settings.hostname,
            port = settings.tcp_port,
            tls = settings.use_tls,
            client_id = %client_id,
            "Connecting to MQTT broker"
        );

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (link_tx, link_rx) = watch::channel(LinkStatus::Pending);
        let (suback_tx, suback_rx) = mpsc::unbounded_channel();

        self.client = Some(client);
        self.link_rx = Some(link_rx.clone());
        self.suback_rx = Some(suback_rx);
        self.event_loop_handle = Some(tokio::spawn(Self::run_event_loop(
            event_loop, link_tx, suback_tx,
        )));

        Self::wait_for_connection_confirmation(link_rx).await
    }

    async fn wait_for_suback(&mut self, topic_filter: &str) -> Result<(), SessionError> {
        let suback_rx = self.suback_rx.as_mut().ok_or_else(|| {
            SessionError::SubscriptionFailed("No acknowledgement channel".to_string())
        })?;

        match suback_rx.recv().await {
            Some(SubAckOutcome {
                granted: true,
                packet_id,
            }) => {
                debug!(target: "mqtt_transport", "SubAck {} for {}", packet_id, topic_filter);
                Ok(())
            }
            Some(SubAckOutcome { granted: false, .. }) => Err(SessionError::SubscriptionFailed(
                format!("Broker rejected subscription to {topic_filter}"),
            )),
            None => Err(SessionError::SubscriptionFailed(format!(
                "Connection closed before SubAck for {topic_filter}"
            ))),
        }
    }
}

impl Default for MqttSessionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionClient for MqttSessionClient {
    async fn connect(&mut self, settings: &ConnectionSettings) -> Result<(), SessionError> {
        if !self.state.can_connect() {
            return Err(SessionError::invalid_state("connect", self.state));
        }

        self.state = SessionState::Connecting;
        match self.establish(settings).await {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!("MQTT client connected to {}:{}", settings.hostname, settings.tcp_port);
                Ok(())
            }
            Err(e) => {
                self.reset_connection();
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), SessionError> {
        let client = self.connected_client("subscribe")?;
        validate_topic_filter(topic_filter)?;

        info!("Subscribing to topic filter: {}", topic_filter);
        client
            .subscribe(topic_filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| {
                SessionError::SubscriptionFailed(format!("Failed to subscribe to {topic_filter}: {e}"))
            })?;

        self.wait_for_suback(topic_filter).await?;
        info!("Successfully subscribed to: {}", topic_filter);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SessionError> {
        let client = self.connected_client("publish")?;
        validate_topic_name(topic)?;

        client
            .publish(
                topic,
                QoS::AtLeastOnce,
                false,
                Bytes::copy_from_slice(payload.as_bytes()),
            )
            .await
            .map_err(|e| SessionError::PublishFailed(format!("Failed to publish to {topic}: {e}")))?;

        info!("Published to {}: {}", topic, payload);
        Ok(())
    }

    async fn end_session(&mut self) {
        if self.state != SessionState::Connected {
            debug!(target: "mqtt_transport", "end_session is a no-op in state {:?}", self.state);
            return;
        }

        match &self.client {
            Some(client) if self.link_is_up() => {
                if let Err(e) = client.disconnect().await {
                    warn!("MQTT disconnect request failed: {}", e);
                }
            }
            _ => {
                debug!(target: "mqtt_transport", "Link already down, releasing session without DISCONNECT");
            }
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {
                    info!("Event loop task shut down gracefully");
                }
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!(
                        "Event loop task didn't shut down within {:?}, aborting",
                        GRACEFUL_SHUTDOWN_TIMEOUT
                    );
                    handle.abort();
                }
                _ => {}
            }
        }

        self.client = None;
        self.link_rx = None;
        self.suback_rx = None;
        self.state = SessionState::Ended;
        info!("MQTT session ended");
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.link_is_up()
    }
}

impl Drop for MqttSessionClient {
    fn drop(&mut self) {
        // No async in Drop; callers use end_session() for a graceful close
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
