//! MQTT bridge to the automation server
//!
//! - every state write of the store is published on [`STATE_TOPIC`]
//! - device actions arrive on [`ACTION_TOPIC`] and go to the dispatcher

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PluginConfig;
use crate::device::{DeviceId, StateValue};
use crate::dispatcher::{DeviceAction, DispatchOutcome, Dispatcher};
use crate::store::StoreEvent;

pub const STATE_TOPIC: &str = "macsys/devices/state@v1";
pub const ACTION_TOPIC: &str = "macsys/devices/action@v1";

/// State change (matches devices.state@v1 contract)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    pub agent_id: String,
    pub device_id: DeviceId,
    pub device: String,
    pub key: String,
    pub value: StateValue,
    pub timestamp: DateTime<Utc>,
}

/// Inbound action (matches devices.action@v1 contract)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub device_id: DeviceId,
    pub action: DeviceAction,
}

/// The part of an MQTT client the bridge uses
#[async_trait]
pub trait MqttPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<()>;
}

#[async_trait]
impl MqttPublisher for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, false, payload)
            .await
            .with_context(|| format!("Failed to publish on {topic}"))
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        AsyncClient::subscribe(self, topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("Failed to subscribe to {topic}"))
    }
}

/// MQTT client and event loop for the configured broker
pub fn connect(config: &PluginConfig) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(
        config.mqtt_client_id(),
        &config.mqtt.broker_host,
        config.mqtt.broker_port,
    );
    options.set_keep_alive(Duration::from_secs(u64::from(config.mqtt.keep_alive_secs)));
    options.set_clean_session(true);
    AsyncClient::new(options, 10)
}

pub struct MqttBridge<P> {
    publisher: P,
    agent_id: String,
    dispatcher: Dispatcher,
}

impl<P: MqttPublisher> MqttBridge<P> {
    pub fn new(publisher: P, agent_id: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            publisher,
            agent_id: agent_id.into(),
            dispatcher,
        }
    }

    pub async fn subscribe_actions(&self) -> Result<()> {
        self.publisher.subscribe(ACTION_TOPIC).await?;
        info!("Subscribed to actions on: {}", ACTION_TOPIC);
        Ok(())
    }

    /// Publish a store event; only state changes go out
    pub async fn publish_event(&self, event: &StoreEvent) -> Result<()> {
        let StoreEvent::StateChanged {
            device_id,
            device,
            key,
            value,
        } = event
        else {
            return Ok(());
        };

        let message = StateMessage {
            agent_id: self.agent_id.clone(),
            device_id: *device_id,
            device: device.clone(),
            key: key.clone(),
            value: value.clone(),
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_vec(&message).context("Failed to serialize state message")?;
        self.publisher.publish(STATE_TOPIC, payload).await
    }

    /// Decode and dispatch one action payload
    pub async fn handle_action(&self, payload: &[u8]) -> Result<DispatchOutcome> {
        let message: ActionMessage =
            serde_json::from_slice(payload).context("Invalid action message")?;
        debug!(device_id = %message.device_id, action = %message.action, "action received");
        let outcome = self
            .dispatcher
            .dispatch(message.device_id, message.action)
            .await
            .with_context(|| format!("Action {} on device {} failed", message.action, message.device_id))?;
        Ok(outcome)
    }

    /// Forward store events until `stop` is cancelled or the store goes away
    pub async fn forward_events(&self, mut events: broadcast::Receiver<StoreEvent>, stop: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Err(e) = self.publish_event(&event).await {
                        error!("Failed to publish state: {:#}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "state publisher lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Drive the rumqttc event loop, handing actions to the bridge
pub async fn run_event_loop(mut eventloop: EventLoop, bridge: Arc<MqttBridge<AsyncClient>>, stop: CancellationToken) {
    loop {
        let polled = tokio::select! {
            _ = stop.cancelled() => break,
            polled = eventloop.poll() => polled,
        };
        match polled {
            Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == ACTION_TOPIC => {
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    match bridge.handle_action(&publish.payload).await {
                        Ok(outcome) => debug!(?outcome, "action handled"),
                        Err(e) => error!("{:#}", e),
                    }
                });
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                debug!("Received MQTT message on topic: {}", publish.topic);
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                // subscriptions do not survive a clean session reconnect
                if let Err(e) = bridge.subscribe_actions().await {
                    error!("{:#}", e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
