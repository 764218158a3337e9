mod config;
mod controller;
mod mqtt;
mod night;
mod pumps;
mod safety;
mod scheduler;
mod sensors;
mod sim;
mod state;
mod thresholds;
mod web;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, MqttOptions};
use std::{env, sync::Arc, time::Duration};
use tokio::signal;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use controller::{Controller, TickTimer};
use mqtt::{Outbound, Publisher, Topics};
use night::{SystemClock, WallClock};
use pumps::{Actuators, PumpBoard};
use sensors::SensorSource;
use sim::{HydroSim, Scenario};
use state::{SharedState, SystemState};

/// Capacity of the override channel between the MQTT task and the loop.
const OVERRIDE_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    info!(path = %config_path, "config loaded");

    // ── Pump board ──────────────────────────────────────────────────
    let mut pumps = PumpBoard::new(&cfg.pins).context("pump board init failed")?;
    pumps.all_off();

    // ── Clock + sensors ─────────────────────────────────────────────
    let clock = SystemClock::new(cfg.night_mode.utc_offset_hours)?;
    if cfg.night_mode.utc_offset_hours.is_none() {
        if let Err(e) = clock.local_hour() {
            error!(error = %e, "local time unavailable; set night_mode.utc_offset_hours");
        }
    }

    let scenario = Scenario::from_str_lossy(&cfg.sim.scenario);
    info!(%scenario, seed = ?cfg.sim.seed, "sensor simulator ready");
    let sensors = HydroSim::new(scenario, cfg.sim.seed);

    let mut controller = Controller::new(&cfg, sensors, pumps, clock);

    // ── Shared state (ephemeral, for the status API) ────────────────
    let shared: SharedState = Arc::new(RwLock::new(SystemState::new()));
    shared
        .write()
        .await
        .record_system("controller started".to_string());

    // ── Web server ──────────────────────────────────────────────────
    if cfg.web.enabled {
        let web_state = Arc::clone(&shared);
        let port = cfg.web.port;
        tokio::spawn(async move {
            if let Err(e) = web::serve(web_state, port).await {
                error!("{e:#}");
            }
        });
    }

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    mqttoptions.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_sec));
    if let (Some(user), Some(pass)) = (&cfg.mqtt.username, &cfg.mqtt.password) {
        mqttoptions.set_credentials(user, pass);
    }

    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);
    let topics = Topics::new(&cfg.mqtt.base_topic);
    let (override_tx, mut override_rx) = mpsc::channel(OVERRIDE_QUEUE);

    tokio::spawn(mqtt::run_event_loop(
        eventloop,
        client.clone(),
        topics.clone(),
        override_tx,
        Arc::clone(&shared),
    ));
    let publisher = Publisher::new(client.clone(), topics);

    info!(
        broker = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        base = %cfg.mqtt.base_topic,
        "controller running"
    );

    // ── Control loop ────────────────────────────────────────────────
    let base = Instant::now();
    let mut reading_tick = TickTimer::new(base, cfg.timing.reading_interval());
    let mut safety_tick = TickTimer::new(base, cfg.timing.safety_check_interval());

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            res = &mut shutdown => {
                if let Err(e) = res {
                    error!(error = %e, "signal handler failed");
                }
                break;
            }
            _ = safety_tick.tick() => {
                let out = controller.safety_pass();
                dispatch(&publisher, &shared, &controller, out).await;
            }
            Some(cmd) = override_rx.recv() => {
                controller.apply_override(cmd);
                let mut st = shared.write().await;
                st.record_override(cmd.pump, cmd.on);
                st.sync(controller.irrigation(), controller.pump_states());
            }
            now_ms = reading_tick.tick() => {
                let out = controller.sampling_pass(now_ms).await;
                dispatch(&publisher, &shared, &controller, out).await;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    info!("shutdown requested");
    controller.shutdown();
    {
        let mut st = shared.write().await;
        st.sync(controller.irrigation(), controller.pump_states());
        st.record_system("controller stopped".to_string());
    }
    if let Err(e) = client.try_disconnect() {
        error!(error = %e, "mqtt disconnect failed");
    }

    Ok(())
}

/// Publish a pass's output and mirror it into the status state.
async fn dispatch<S, A, C>(
    publisher: &Publisher,
    shared: &SharedState,
    controller: &Controller<S, A, C>,
    out: Vec<Outbound>,
) where
    S: SensorSource,
    A: Actuators,
    C: WallClock,
{
    let mut st = shared.write().await;
    for msg in out {
        publisher.publish(&msg);
        match msg {
            Outbound::Telemetry(_) => {
                if let Some(snap) = controller.last_snapshot() {
                    st.record_reading(snap);
                }
            }
            Outbound::Alert(text) => st.record_alert(text),
            Outbound::Status(text) => st.record_status(text),
        }
    }
    st.sync(controller.irrigation(), controller.pump_states());
}
