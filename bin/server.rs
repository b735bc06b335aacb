// Visit Report - Web Server
// REST API with Axum: serve the last summary, trigger a re-run

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use visit_report::config::{
    DEFAULT_MEMBERS_PATH, DEFAULT_OUTPUT_PATH, DEFAULT_SUMMARY_PATH, DEFAULT_VISITS_PATH,
};
use visit_report::{
    load_summary, run_pipeline, PipelinePaths, ReportError, RunOptions, Summary, DEFAULT_TOP_N,
};

/// Command-line arguments for visit-server
#[derive(Parser, Debug)]
#[command(name = "visit-server")]
#[command(about = "Serve the visit report summary and trigger re-runs")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "VISIT_REPORT_PORT")]
    port: u16,

    #[arg(long, default_value = DEFAULT_MEMBERS_PATH, env = "VISIT_REPORT_MEMBERS")]
    members: PathBuf,

    #[arg(long, default_value = DEFAULT_VISITS_PATH, env = "VISIT_REPORT_VISITS")]
    visits: PathBuf,

    #[arg(long, default_value = DEFAULT_OUTPUT_PATH, env = "VISIT_REPORT_OUTPUT")]
    output: PathBuf,

    #[arg(long, default_value = DEFAULT_SUMMARY_PATH, env = "VISIT_REPORT_SUMMARY")]
    summary: PathBuf,

    #[arg(long, default_value_t = DEFAULT_TOP_N, env = "VISIT_REPORT_TOP_N")]
    top_n: usize,

    /// Built frontend to serve at /
    #[arg(long, default_value = "frontend/dist", env = "VISIT_REPORT_STATIC_DIR")]
    static_dir: PathBuf,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    paths: Arc<PipelinePaths>,
    options: RunOptions,
    /// Held for the whole of a run so runs never overlap
    run_lock: Arc<Mutex<()>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct RunResponse {
    ok: bool,
    summary: Summary,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::err(message))).into_response()
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/result - Last persisted summary, without re-running
async fn get_result(State(state): State<AppState>) -> Response {
    let path = state.paths.summary.clone();

    match tokio::task::spawn_blocking(move || load_summary(&path)).await {
        Ok(Ok(summary)) => (StatusCode::OK, Json(summary)).into_response(),
        Ok(Err(ReportError::InputNotFound { .. })) => error_response(
            StatusCode::NOT_FOUND,
            "summary.json not found. Run the report first.",
        ),
        Ok(Err(e)) => {
            error!("Error reading summary: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!("Summary reader task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "summary reader failed")
        }
    }
}

/// POST /api/run - Run the pipeline once; concurrent calls queue on the run lock
///
/// The guard travels into the blocking task, so the lock stays held until the
/// pipeline returns even if this handler is dropped first.
async fn trigger_run(State(state): State<AppState>) -> Response {
    let guard = Arc::clone(&state.run_lock).lock_owned().await;

    let paths = Arc::clone(&state.paths);
    let options = state.options;

    let run = tokio::task::spawn_blocking(move || {
        let outcome = run_pipeline(&paths, &options);
        drop(guard);
        outcome
    });

    match run.await {
        Ok(Ok(outcome)) => {
            info!(run_id = %outcome.summary.run_id, "run triggered over HTTP finished");
            let body = RunResponse {
                ok: true,
                summary: outcome.summary,
            };
            (StatusCode::OK, Json(ApiResponse::ok(body))).into_response()
        }
        Ok(Err(e)) => {
            error!("Report run failed: {}", e);
            let status = if e.is_input_error() {
                StatusCode::UNPROCESSABLE_ENTITY
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            error_response(status, e.to_string())
        }
        Err(e) => {
            error!("Report task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "report task failed")
        }
    }
}

/// GET / - Shown when no frontend build is present
async fn serve_placeholder() -> impl IntoResponse {
    Html(PLACEHOLDER_PAGE)
}

const PLACEHOLDER_PAGE: &str = r#"<html>
  <head><title>Visit Report</title></head>
  <body style="font-family: sans-serif; padding: 24px;">
    <h1>Frontend not built</h1>
    <p>Generate the report, then build the frontend.</p>
    <ul>
      <li>visit-report --members data/members.csv --visits data/visits.csv</li>
      <li>or POST /api/run</li>
      <li>GET /api/result returns the latest summary</li>
    </ul>
  </body>
</html>
"#;

fn build_app(state: AppState, static_dir: &std::path::Path) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/result", get(get_result))
        .route("/run", post(trigger_run))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes);

    let app = if static_dir.is_dir() {
        app.fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
    } else {
        app.route("/", get(serve_placeholder))
    };

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visit_report=info,visit_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let state = AppState {
        paths: Arc::new(PipelinePaths::new(
            args.members,
            args.visits,
            args.output,
            args.summary,
        )),
        options: RunOptions { top_n: args.top_n },
        run_lock: Arc::new(Mutex::new(())),
    };

    if !args.static_dir.is_dir() {
        info!(
            "Static dir {} not found, serving placeholder page",
            args.static_dir.display()
        );
    }
    let app = build_app(state, &args.static_dir);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server running on http://localhost:{}", args.port);
    info!("API: http://localhost:{}/api/result", args.port);

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::fs;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> AppState {
        AppState {
            paths: Arc::new(PipelinePaths::new(
                dir.join("members.csv"),
                dir.join("visits.csv"),
                dir.join("out").join("output.csv"),
                dir.join("out").join("summary.json"),
            )),
            options: RunOptions::default(),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_result_before_any_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path()), &dir.path().join("no-frontend"));

        let (status, body) = call(app, "GET", "/api/result").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_run_then_read_result() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("members.csv"), "member_id,barcode\nM1,B1\n").unwrap();
        fs::write(dir.path().join("visits.csv"), "visit_id,barcode\nV1,B1\nV2,\n").unwrap();
        let state = test_state(dir.path());
        let no_frontend = dir.path().join("no-frontend");

        let (status, body) = call(build_app(state.clone(), &no_frontend), "POST", "/api/run").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ok"], true);

        let (status, body) = call(build_app(state, &no_frontend), "GET", "/api/result").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_valid_visits"], 1);
        assert_eq!(body["total_walk_ins"], 1);
    }

    #[tokio::test]
    async fn test_run_with_missing_input_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_app(test_state(dir.path()), &dir.path().join("no-frontend"));

        let (status, body) = call(app, "POST", "/api/run").await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("not found"));
        assert!(!dir.path().join("out").exists());
    }

    /// Inputs big enough that a run is still going a few milliseconds in
    fn write_large_inputs(dir: &std::path::Path, visits: usize) {
        let mut members = String::from("member_id,barcode\n");
        for m in 0..1_000 {
            members.push_str(&format!("M{m},B{m}\n"));
        }
        let mut rows = String::from("visit_id,barcode,reservation_id\n");
        for v in 0..visits {
            rows.push_str(&format!("V{v},B{},\n", v % 1_200));
        }
        fs::write(dir.join("members.csv"), members).unwrap();
        fs::write(dir.join("visits.csv"), rows).unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_request_keeps_lock_until_run_finishes() {
        let dir = tempfile::tempdir().unwrap();
        write_large_inputs(dir.path(), 300_000);
        let state = test_state(dir.path());
        let summary = state.paths.summary.clone();

        // The handler is dropped once the blocking run has been spawned
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            trigger_run(State(state.clone())),
        )
        .await;
        assert!(cancelled.is_err());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(120);
        loop {
            // Lock first, file second: a free lock means the run already renamed its outputs
            let lock_free = state.run_lock.try_lock().is_ok();
            if lock_free {
                assert!(
                    summary.exists(),
                    "run lock released while a run was still in flight"
                );
                break;
            }
            assert!(std::time::Instant::now() < deadline, "run never finished");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert!(!dir.path().join("out").join("summary.json.tmp").exists());
        assert!(!dir.path().join("out").join("output.csv.tmp").exists());
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        write_large_inputs(dir.path(), 50_000);
        let state = test_state(dir.path());

        let (first, second) = tokio::join!(
            trigger_run(State(state.clone())),
            trigger_run(State(state.clone()))
        );

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);

        let persisted = load_summary(&state.paths.summary).unwrap();
        assert_eq!(persisted.total_visits, 50_000);
        assert_eq!(persisted.total_valid_visits + persisted.total_unknown_barcodes, 50_000);
        assert!(state.run_lock.try_lock().is_ok());
    }
}
