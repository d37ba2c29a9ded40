/*!
Test harness for agent scenarios

Wires a [`MemoryStore`], a [`ScriptedRunner`] and a [`PluginContext`] with the
settle pause disabled, so scheduler and dispatcher scenarios run instantly.
*/

use macsys_agent::bridge::MqttBridge;
use macsys_agent::config::PollingSettings;
use macsys_agent::device::{DeviceId, DeviceRecord, StateValue};
use macsys_agent::logging::{LogFlags, PluginLog};
use macsys_agent::timer::TimerError;
use macsys_agent::upgrade::upgrade_device;
use macsys_agent::{DeviceStore, Dispatcher, MemoryStore, PluginContext, Scheduler};
use std::sync::Arc;

use crate::mqtt_stub::MockMqttClient;
use crate::scripted_runner::ScriptedRunner;

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub runner: ScriptedRunner,
    pub ctx: PluginContext,
    pub mqtt_client: MockMqttClient,
}

impl TestHarness {
    pub fn new(devices: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("macsys_agent=trace")
            .try_init();

        let store = Arc::new(MemoryStore::with_devices(devices));
        let runner = ScriptedRunner::new();
        let log = PluginLog::new(LogFlags::MAIN_EVENTS | LogFlags::DEBUG);
        let ctx = PluginContext::new(store.clone(), Arc::new(runner.clone()), log, None);

        Self {
            store,
            runner,
            ctx,
            mqtt_client: MockMqttClient::new(),
        }
    }

    /// Run the upgrade contract on every device, as the scheduler does at start
    pub fn prepare(&self) -> &Self {
        for id in self.store.device_ids() {
            upgrade_device(self.store.as_ref(), &self.ctx.log, &self.ctx.policy, id)
                .unwrap_or_else(|e| panic!("cannot prepare device {id}: {e}"));
        }
        self
    }

    /// Scheduler over the harness context; needs a tokio runtime
    pub fn scheduler(&self) -> Result<Scheduler, TimerError> {
        self.scheduler_with(PollingSettings::default())
    }

    pub fn scheduler_with(&self, settings: PollingSettings) -> Result<Scheduler, TimerError> {
        Scheduler::new(self.ctx.clone(), settings)
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.ctx.clone())
    }

    pub fn bridge(&self) -> MqttBridge<MockMqttClient> {
        MqttBridge::new(self.mqtt_client.clone(), "test-agent", self.dispatcher())
    }

    pub fn state(&self, id: i64, key: &str) -> Option<StateValue> {
        self.store.state(DeviceId(id), key).ok().flatten()
    }

    pub fn record(&self, id: i64) -> DeviceRecord {
        self.store
            .device(DeviceId(id))
            .unwrap_or_else(|_| panic!("device {id} not in the harness store"))
    }
}
