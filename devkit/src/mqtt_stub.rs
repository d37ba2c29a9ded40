/*!
Mock MQTT client for development without a broker

Records every published message and lets tests simulate inbound ones.
*/

use anyhow::Result;
use async_trait::async_trait;
use macsys_agent::bridge::MqttPublisher;
use parking_lot::Mutex;
use rumqttc::QoS;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT client standing in for `rumqttc::AsyncClient`
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel receiving the simulated inbound messages
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock() = Some(sender);
        receiver
    }

    /// Simulate an inbound message (for tests)
    pub fn simulate_incoming(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<()> {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        if let Some(sender) = self.message_sender.lock().as_ref() {
            sender
                .send(message.clone())
                .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        }
        info!("[MOCK] Simulated incoming: {}", message.topic);
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse every message of a topic as JSON
    pub fn json_messages<T>(&self, topic: &str) -> Result<Vec<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        self.find_messages_by_topic(topic)
            .iter()
            .map(|msg| serde_json::from_slice(&msg.payload).map_err(Into::into))
            .collect()
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
        self.subscriptions.lock().clear();
    }
}

#[async_trait]
impl MqttPublisher for MockMqttClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let message = MockMessage {
            topic: topic.to_string(),
            payload,
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        info!("[MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().push(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().push(topic.to_string());
        info!("[MOCK] Subscribed to {}", topic);
        Ok(())
    }
}
