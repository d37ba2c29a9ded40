//! macOS System agent - process and volume monitoring for home automation
//!
//! - Loads its configuration (`MACSYS_AGENT_CONFIG` or the OS config dir)
//! - Seeds the device store and runs the polling scheduler
//! - Publishes state changes and receives device actions over MQTT
//! - Restores the last snapshot at start and writes it on Ctrl-C, when configured

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use macsys_agent::bridge::{self, MqttBridge};
use macsys_agent::config::PluginConfig;
use macsys_agent::execution::SystemRunner;
use macsys_agent::logging::{init_tracing, PluginLog};
use macsys_agent::probe::disk::DISK_SLEEP_PREF;
use macsys_agent::{DeviceStore, Dispatcher, MemoryStore, PluginContext, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut config = PluginConfig::load().await.context("Failed to load configuration")?;
    info!("macOS System agent v{} starting", config.agent.version);

    let log = PluginLog::from_settings(&mut config.log);

    let store = match &config.snapshot_path {
        Some(path) => MemoryStore::restore(config.devices.clone(), path)
            .await
            .with_context(|| format!("Failed to restore snapshot from {}", path.display()))?,
        None => MemoryStore::with_devices(config.devices.clone()),
    };
    let store = Arc::new(store);
    store.write_plugin_pref(DISK_SLEEP_PREF, config.disk_sleep_minutes.into());

    let ctx = PluginContext::new(store.clone(), Arc::new(SystemRunner), log, config.polling.settle())
        .with_policy(config.match_policy.clone())
        .with_applescript_retries(config.polling.applescript_retries);

    let stop = CancellationToken::new();
    let mut tasks = Vec::new();

    if config.mqtt.enabled {
        let (client, eventloop) = bridge::connect(&config);
        let bridge = Arc::new(MqttBridge::new(client, config.agent.agent_id.clone(), Dispatcher::new(ctx.clone())));

        let events = store.subscribe();
        let forwarder = Arc::clone(&bridge);
        let token = stop.clone();
        tasks.push(tokio::spawn(async move { forwarder.forward_events(events, token).await }));
        tasks.push(tokio::spawn(bridge::run_event_loop(eventloop, bridge, stop.clone())));
        info!(
            "MQTT bridge towards {}:{}",
            config.mqtt.broker_host, config.mqtt.broker_port
        );
    }

    let mut scheduler = Scheduler::new(ctx, config.polling.clone()).context("Failed to arm timers")?;
    let token = stop.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(token).await;
        scheduler.disk_sleep_minutes()
    });

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Stopping agent");
    stop.cancel();

    let disk_sleep = scheduler_task.await.context("Scheduler task failed")?;
    for task in tasks {
        if let Err(e) = task.await {
            error!("Bridge task failed: {}", e);
        }
    }

    if let Some(path) = &config.snapshot_path {
        store
            .save_snapshot(path)
            .await
            .with_context(|| format!("Failed to save snapshot to {}", path.display()))?;
    }

    if disk_sleep != config.disk_sleep_minutes {
        config.disk_sleep_minutes = disk_sleep;
        config.save().await.context("Failed to save configuration")?;
    }
    Ok(())
}
