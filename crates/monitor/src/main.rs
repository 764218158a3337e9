mod console;
mod history;
mod reconnect;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use console::{parse_line, Command, USAGE};
use history::{classify, History, Inbound};
use reconnect::Reconnect;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let base = env::var("BASE_TOPIC").unwrap_or_else(|_| "hydroponics/".to_string());

    // ── MQTT ────────────────────────────────────────────────────────
    let client_id = format!("hydro-monitor-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, broker.clone(), port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    let filter = format!("{base}#");
    let mut history = History::default();
    let mut reconnect = Reconnect::default();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!(%broker, port, %filter, "monitor starting");
    println!("{USAGE}");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = reconnect.wait(), if reconnect.is_waiting() => {}
            event = eventloop.poll(), if !reconnect.is_waiting() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    reconnect.connected();
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        warn!(error = %e, "subscribe failed");
                    }
                    info!(%filter, "mqtt connected");
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    match classify(&base, &p.topic, &p.payload) {
                        Ok(Some(msg)) => {
                            log_inbound(&msg);
                            history.ingest(msg, OffsetDateTime::now_utc());
                        }
                        Ok(None) => {}
                        Err(e) => warn!(topic = %p.topic, "{e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = reconnect.schedule();
                    warn!(error = %e, retry_in_secs = delay.as_secs(), "mqtt error, reconnecting");
                }
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&client, &base, &history, &line),
                Ok(None) => {
                    info!("stdin closed, monitoring only");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
        }
    }

    Ok(())
}

fn log_inbound(msg: &Inbound) {
    match msg {
        Inbound::Telemetry(t) => info!(
            temperature = t.temperature,
            humidity = t.humidity,
            ph = t.ph,
            ec = t.ec,
            water_level = t.water_level,
            pump1 = t.pump1,
            pump2 = t.pump2,
            "reading"
        ),
        Inbound::Alert(text) => warn!("ALERT: {text}"),
        Inbound::Status(text) => info!("status: {text}"),
        Inbound::Control { target, payload } => info!(%target, %payload, "pump command"),
    }
}

fn handle_line(client: &AsyncClient, base: &str, history: &History, line: &str) {
    match parse_line(line) {
        Ok(Some(Command::Pump { target, on })) => {
            let topic = format!("{base}control/{}", target.control_suffix());
            match client.try_publish(topic.as_str(), QoS::AtLeastOnce, false, Command::payload(on)) {
                Ok(()) => println!("sent {} to {topic}", Command::payload(on)),
                Err(e) => warn!(%topic, error = %e, "publish failed"),
            }
        }
        Ok(Some(Command::Status)) => print!("{}", history.summary()),
        Ok(Some(Command::Help)) => println!("{USAGE}"),
        Ok(None) => {}
        Err(e) => println!("{e}\n{USAGE}"),
    }
}
