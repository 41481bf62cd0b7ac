//! HTTP rendering surface.
//!
//! Exposes the engine over:
//! - SSE (`/stream`) carrying every render frame as JSON
//! - `/state` for the current display snapshot
//! - small POST endpoints for mode changes, reset, historical reports and
//!   simulated alerts

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        Html, IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::engine::{Command, DisplayMode, DisplaySnapshot, Engine, EngineHandle};
use crate::gazetteer::Gazetteer;
use crate::ingest;
use crate::models::{EewAlert, SeismicReport};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub engine: EngineConfig,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    engine: EngineHandle,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/stream", get(sse_handler))
        .route("/state", get(state_handler))
        .route("/mode", post(mode_handler))
        .route("/reset", post(reset_handler))
        .route("/report", post(report_handler))
        .route("/simulate", post(simulate_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Start the feeds, the engine, and the web server.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let (tx, rx) = mpsc::channel(64);
    let feeds = ingest::spawn_feeds(&config.engine.feeds, &tx, &shutdown);
    drop(tx);

    let (engine, engine_task) = Engine::new(config.engine.clone(), Gazetteer::builtin()).spawn(rx, shutdown.clone());
    let app = create_router(AppState { engine });

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("🌍 quakewatch server starting at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("interrupt received, shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for feed in feeds {
        let _ = feed.await;
    }
    engine_task.await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Minimal page that prints the frame stream.
async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// SSE stream of render frames, one named event per frame kind.
async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.subscribe();
    // Lagged receivers skip ahead; the next display frame resyncs them
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let frame = result.ok()?;
        Event::default().event(frame.kind()).json_data(&frame).ok().map(Ok)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Current display snapshot.
async fn state_handler(State(state): State<AppState>) -> Json<DisplaySnapshot> {
    Json(state.engine.snapshot())
}

#[derive(Debug, Deserialize)]
struct ModeRequest {
    mode: DisplayMode,
}

async fn mode_handler(State(state): State<AppState>, Json(req): Json<ModeRequest>) -> impl IntoResponse {
    tracing::info!(mode = req.mode.as_str(), "mode change requested");
    dispatch(&state, Command::SetMode(req.mode)).await
}

async fn reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    dispatch(&state, Command::Reset).await
}

/// Show a historical report (switches to manual mode).
async fn report_handler(State(state): State<AppState>, Json(report): Json<SeismicReport>) -> impl IntoResponse {
    dispatch(&state, Command::ShowReport(Box::new(report))).await
}

/// Inject an alert into the simulation reconciler.
async fn simulate_handler(State(state): State<AppState>, Json(alert): Json<EewAlert>) -> impl IntoResponse {
    dispatch(&state, Command::Simulate(Box::new(alert))).await
}

async fn dispatch(state: &AppState, command: Command) -> StatusCode {
    if state.engine.send(command).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="ja">
<head>
    <meta charset="UTF-8">
    <title>quakewatch</title>
    <style>
        body { font-family: ui-monospace, monospace; background: #111; color: #ddd; margin: 2rem; }
        #phase { font-size: 1.5rem; font-weight: bold; }
        .warning { color: #ff5252; } .forecasting { color: #ffd740; } .final { color: #ffab40; }
        pre { background: #1b1b1b; padding: 1rem; overflow: auto; }
    </style>
</head>
<body>
    <div id="phase">idle</div>
    <div id="countdown"></div>
    <pre id="display"></pre>
    <script>
        const source = new EventSource('/stream');
        source.addEventListener('display', (e) => {
            const snap = JSON.parse(e.data);
            const phase = document.getElementById('phase');
            phase.textContent = `${snap.mode} · ${snap.phase}`;
            phase.className = snap.phase;
            document.getElementById('display').textContent = JSON.stringify(snap, null, 2);
            if (!snap.playing) document.getElementById('countdown').textContent = '';
        });
        source.addEventListener('waves', (e) => {
            const frame = JSON.parse(e.data);
            if (frame.countdown) {
                const s = Math.ceil(frame.countdown.s_remaining_secs);
                document.getElementById('countdown').textContent =
                    s > 0 ? `S-wave in ${s}s` : 'S-wave arrived';
            }
        });
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reconcile::EewPhase;

    fn app() -> (AppState, CancellationToken) {
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (engine, _task) = Engine::new(EngineConfig::default(), Gazetteer::builtin()).spawn(rx, cancel.clone());
        (AppState { engine }, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_and_simulate_endpoints() {
        let (state, cancel) = app();

        let status = mode_handler(
            State(state.clone()),
            Json(ModeRequest {
                mode: DisplayMode::Simulation,
            }),
        )
        .await
        .into_response()
        .status();
        assert_eq!(status, StatusCode::ACCEPTED);

        let alert = EewAlert {
            title: "緊急地震速報（警報）".into(),
            event_id: "S1".into(),
            hypocenter: "千葉県東方沖".into(),
            warning: Some(true),
            ..Default::default()
        };
        let status = simulate_handler(State(state.clone()), Json(alert)).await.into_response().status();
        assert_eq!(status, StatusCode::ACCEPTED);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let Json(snapshot) = state_handler(State(state.clone())).await;
        assert_eq!(snapshot.mode, DisplayMode::Simulation);
        assert_eq!(snapshot.phase, EewPhase::Warning);
        assert_eq!(snapshot.eew.event_id, "S1");

        let _ = reset_handler(State(state.clone())).await.into_response();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let Json(snapshot) = state_handler(State(state.clone())).await;
        assert_eq!(snapshot.phase, EewPhase::Idle);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dispatch(&state, Command::Reset).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_mode_request_parses() {
        let req: ModeRequest = serde_json::from_str(r#"{"mode":"manual"}"#).unwrap();
        assert_eq!(req.mode, DisplayMode::Manual);
        assert!(serde_json::from_str::<ModeRequest>(r#"{"mode":"paused"}"#).is_err());
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health_handler().await, "OK");
    }
}
