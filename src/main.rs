use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use scrollcast::{capture, core::config::RecorderConfig, jobs, types::*, AppState};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["SCROLLCAST_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting scrollcast recording server");

    let config = RecorderConfig::load();
    tokio::fs::create_dir_all(&config.output_root).await?;
    info!("Recordings directory: {}", config.output_root.display());

    if capture::browser::find_chrome_executable().is_none() {
        warn!("No Chromium-family browser found at startup; recording requests will fail until one is installed (or CHROME_EXECUTABLE is set)");
    }
    if which::which("ffmpeg").is_err() {
        warn!("ffmpeg not found on PATH; recording requests will fail until it is installed");
    }

    let static_dir = config.static_dir.clone();
    let state = Arc::new(AppState::new(config));

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/record", post(record_handler))
        .route("/api/status/{id}", get(status_handler))
        .fallback_service(ServeDir::new(&static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start server
    let port: u16 = parse_port_from_args()
        .or_else(port_from_env)
        .unwrap_or(3000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/SCROLLCAST_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("Recording server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "scrollcast",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn record_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecordRequest>,
) -> Result<Json<RecordAccepted>, (StatusCode, Json<ErrorResponse>)> {
    let urls = jobs::parse_url_list(&request.urls);
    if urls.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "No URLs provided.".to_string(),
            }),
        ));
    }

    let pixels_per_second = jobs::clamp_scroll_speed(
        request.scroll_speed.as_ref(),
        state.config.default_scroll_speed,
        state.config.min_scroll_speed,
    );

    let job_id = state.jobs.create();
    info!(job = %job_id, "accepted {} URL(s) at {} px/s", urls.len(), pixels_per_second);
    tokio::spawn(jobs::run_job(
        Arc::clone(&state),
        job_id,
        urls,
        pixels_per_second,
    ));

    Ok(Json(RecordAccepted { job_id }))
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<jobs::Job>, (StatusCode, Json<ErrorResponse>)> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Job not found.".to_string(),
            }),
        )
    };

    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let job = state.jobs.snapshot(id).ok_or_else(not_found)?;
    Ok(Json(job))
}
