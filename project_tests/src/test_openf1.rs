//! # OpenF1 Live Probe
//!
//! Runs the live engine against the public OpenF1 API for one session and
//! prints everything a WebSocket client subscribed to the chosen topics would
//! receive.

use clap::Parser;
use lib_pitwall::core::{ConnectionHub, handler_fn};
use lib_pitwall::ingestors::{OpenF1Config, OpenF1Source};
use lib_pitwall::{EngineConfig, LiveEngine, Topic};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(about = "Poll one OpenF1 session and print detected race events")]
struct Args {
    /// OpenF1 session key, e.g. 9161 or "latest".
    #[clap(long, default_value = "latest")]
    session: String,

    /// Topics to subscribe (ranking, lap_times, pit_stops, weather, drivers, events).
    #[clap(long, value_delimiter = ',', default_value = "ranking,events")]
    topics: Vec<Topic>,

    /// How long to listen before exiting.
    #[clap(long, default_value_t = 30)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let hub = Arc::new(ConnectionHub::new());
    let source = Arc::new(OpenF1Source::new(&OpenF1Config::default())?);
    let engine = LiveEngine::new(EngineConfig::default(), source, hub.clone());

    engine.bus().subscribe_all(handler_fn("stdout", |event| {
        println!("[EVENT] {}", event.message);
        Ok(())
    }));

    let (conn, mut rx) = hub.add_client();
    for topic in &args.topics {
        let reply = engine.subscribe(conn, *topic, &args.session);
        println!("[*] {} {}", reply.r#type, reply.payload);
    }

    println!("[*] Listening on session {} for {}s...", args.session, args.seconds);
    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            delivery = rx.recv() => {
                let Some(message) = delivery else { break };
                let summary = match message.payload.get("data").and_then(|d| d.as_array()) {
                    Some(records) => format!("{} records", records.len()),
                    None => message.payload.to_string(),
                };
                println!("[{}] {}", message.r#type, summary);
            }
        }
    }

    engine.on_disconnect(conn);
    engine.shutdown();
    println!("[*] Done.");
    Ok(())
}
