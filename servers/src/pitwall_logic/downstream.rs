use crate::pitwall_logic::config::Config;
use crate::pitwall_logic::state::AppState;
use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::StreamExt;
use lib_pitwall::racing::ServerMessage;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/sessions/{session_id}/events", get(session_events_handler))
        .route("/sessions/{session_id}", axum::routing::delete(clear_session_handler))
        .layer(cors)
        .with_state(app_state)
}

pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let app = router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));

    if let Some((cert_path, key_path)) = config.tls_paths() {
        log::info!("Loading TLS certs from: {}", cert_path.display());
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("TLS configuration error")?;

        let handle = axum_server::Handle::new();
        let signal_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
            signal_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        log::info!("Downstream server listening on wss://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        log::info!("Downstream server listening on ws://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Downstream server shutting down.");
            })
            .await?;
    }
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn session_events_handler(Path(session_id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.recent_events(&session_id))
}

async fn clear_session_handler(Path(session_id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.clear_session(&session_id))
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json_str) => Some(Message::Text(json_str.into())),
        Err(e) => {
            log::error!("Failed to encode {} message: {}", message.r#type, e);
            None
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (client_id, mut outbound) = state.hub.add_client();
    log::info!("Client {} connected ({} open)", client_id, state.hub.len());

    loop {
        tokio::select! {
            // Requests from the client
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = state.engine.handle_client_message(client_id, text.as_str());
                        if let Some(frame) = encode(&reply) {
                            if socket.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            // Snapshots, events and stream errors routed to this connection
            delivery = outbound.recv() => {
                let Some(message) = delivery else { break };
                if let Some(frame) = encode(&message) {
                    if socket.send(frame).await.is_err() {
                        break; // client disconnected
                    }
                }
            }
        }
    }

    state.engine.on_disconnect(client_id);
    state.hub.remove_client(client_id);
    log::info!("Client {} disconnected ({} open)", client_id, state.hub.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_pitwall::core::ConnectionHub;
    use lib_pitwall::ingestors::{OpenF1Config, OpenF1Source};
    use lib_pitwall::{EngineConfig, EventKind, LiveEngine, RaceEvent, Topic};
    use serde_json::{Value, json};
    use std::sync::Arc;

    async fn serve(app_state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(app_state)).await });
        addr
    }

    #[tokio::test]
    async fn session_routes_expose_history_and_clearance() {
        // Nothing here polls upstream; the events topic is fed by the bus only.
        let source = OpenF1Source::new(&OpenF1Config {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .unwrap();
        let hub = Arc::new(ConnectionHub::new());
        let engine = LiveEngine::new(EngineConfig::default(), Arc::new(source), hub.clone());
        let (conn, _rx) = hub.add_client();
        engine.subscribe(conn, Topic::Events, "9161");
        engine
            .bus()
            .publish(RaceEvent::new(EventKind::Overtake, "9161", 16, "LEC overtakes VER! Now P1".to_string()).with_target(1))
            .await;

        let addr = serve(AppState::new(engine.clone(), hub)).await;
        let client = reqwest::Client::new();

        let health = client.get(format!("http://{}/health", addr)).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");

        let events: Value = client
            .get(format!("http://{}/sessions/9161/events", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(events.as_array().map(Vec::len), Some(1));
        assert_eq!(events[0]["kind"], "overtake");
        assert_eq!(events[0]["session_id"], "9161");
        assert_eq!(events[0]["target_driver_number"], 1);

        let clearance: Value = client
            .delete(format!("http://{}/sessions/9161", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            clearance,
            json!({"session_id": "9161", "cleared": false, "evicted_connections": [conn]})
        );

        let events: Value = client
            .get(format!("http://{}/sessions/9161/events", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(events, json!([]));
        engine.shutdown();
    }
}
