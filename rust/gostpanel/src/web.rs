use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use base64::prelude::*;
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    config::{sha256_hex, AuthConfig},
    panel::{Panel, PanelError},
    rules::{ForwardingRule, RuleError, RuleInput},
    service::SyncOutcome,
    store::StoreError,
};

const INDEX_HTML: &str = include_str!("web_ui.html");
const REALM: &str = "Basic realm=\"gostpanel\"";

#[derive(Clone)]
pub struct AppState {
    pub panel: Arc<Panel>,
    pub auth: Arc<AuthConfig>,
    pub os: Arc<str>,
}

#[derive(Debug, Serialize)]
struct ApiState {
    os: String,
    service_active: bool,
    rules: Vec<ForwardingRule>,
}

/// Banner shown by the page after a form round-trip, passed as `/?flash=<code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flash {
    Added,
    Deleted,
    MissingField,
    InvalidPort,
    InvalidProtocol,
    InvalidAddress,
    InvalidIndex,
    SaveFailed,
}

impl Flash {
    fn code(self) -> &'static str {
        match self {
            Flash::Added => "added",
            Flash::Deleted => "deleted",
            Flash::MissingField => "missing_field",
            Flash::InvalidPort => "invalid_port",
            Flash::InvalidProtocol => "invalid_protocol",
            Flash::InvalidAddress => "invalid_address",
            Flash::InvalidIndex => "invalid_index",
            Flash::SaveFailed => "save_failed",
        }
    }

    fn from_error(e: &PanelError) -> Self {
        match e {
            PanelError::Rule(RuleError::MissingField(_)) => Flash::MissingField,
            PanelError::Rule(RuleError::InvalidPort { .. }) => Flash::InvalidPort,
            PanelError::Rule(RuleError::InvalidProtocol(_)) => Flash::InvalidProtocol,
            PanelError::Rule(RuleError::InvalidAddress { .. }) => Flash::InvalidAddress,
            PanelError::Store(StoreError::IndexOutOfRange { .. }) => Flash::InvalidIndex,
            PanelError::Store(_) => Flash::SaveFailed,
        }
    }

    fn redirect(self) -> Redirect {
        Redirect::to(&format!("/?flash={}", self.code()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(form_add))
        .route("/delete/:id", post(form_delete))
        .route("/api/state", get(api_state))
        .route("/api/rules", get(api_rules).post(api_add))
        .route("/api/rules/:id", delete(api_delete))
        .route("/api/apply", post(api_apply))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

pub async fn serve(state: AppState, listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("listen addr parse {listen}"))?;
    let app = router(state);
    info!("panel listening on http://{}", addr);

    axum::serve(TcpListener::bind(addr).await.context("bind web")?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("web serve")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }
    info!("shutting down");
}

async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if is_authorized(req.headers(), &state.auth) {
        return next.run(req).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, REALM)],
        "authentication required",
    )
        .into_response()
}

fn is_authorized(headers: &HeaderMap, auth: &AuthConfig) -> bool {
    let Some(v) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = v.trim().strip_prefix("Basic ") else {
        return false;
    };
    let Ok(raw) = BASE64_STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(raw) = String::from_utf8(raw) else {
        return false;
    };
    let Some((user, pass)) = raw.split_once(':') else {
        return false;
    };
    user == auth.username && sha256_hex(pass).eq_ignore_ascii_case(auth.password_sha256.trim())
}

/// Run store and systemctl work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("blocking task failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn index() -> impl IntoResponse {
    // Single-page UI. Rules come from /api/state.
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store, max-age=0"));
    (StatusCode::OK, headers, Html(INDEX_HTML))
}

async fn form_add(State(state): State<AppState>, Form(input): Form<RuleInput>) -> Result<Redirect, StatusCode> {
    let panel = state.panel.clone();
    let flash = match blocking(move || panel.add(&input)).await? {
        Ok(_) => Flash::Added,
        Err(e) => {
            warn!("rule rejected: {e}");
            Flash::from_error(&e)
        }
    };
    Ok(flash.redirect())
}

async fn form_delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<Redirect, StatusCode> {
    let Ok(id) = id.parse::<usize>() else {
        return Ok(Flash::InvalidIndex.redirect());
    };
    let panel = state.panel.clone();
    let flash = match blocking(move || panel.delete(id)).await? {
        Ok(_) => Flash::Deleted,
        Err(e) => Flash::from_error(&e),
    };
    Ok(flash.redirect())
}

async fn api_state(State(state): State<AppState>) -> Result<Json<ApiState>, StatusCode> {
    let panel = state.panel.clone();
    let (rules, service_active) = blocking(move || (panel.rules(), panel.service_active())).await?;
    Ok(Json(ApiState { os: state.os.to_string(), service_active, rules }))
}

async fn api_rules(State(state): State<AppState>) -> Result<Json<Vec<ForwardingRule>>, StatusCode> {
    let panel = state.panel.clone();
    Ok(Json(blocking(move || panel.rules()).await?))
}

async fn api_add(State(state): State<AppState>, payload: Result<Json<RuleInput>, JsonRejection>) -> Response {
    let input = match payload {
        Ok(Json(input)) => input,
        Err(rej) => return error_json(StatusCode::BAD_REQUEST, rej.body_text()),
    };
    let panel = state.panel.clone();
    match blocking(move || panel.add(&input)).await {
        Ok(Ok(rule)) => (StatusCode::CREATED, Json(serde_json::json!({"result": "ok", "rule": rule}))).into_response(),
        Ok(Err(e)) => panel_error(e),
        Err(code) => code.into_response(),
    }
}

async fn api_delete(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<usize>() else {
        return error_json(StatusCode::NOT_FOUND, format!("invalid rule id {id:?}"));
    };
    let panel = state.panel.clone();
    match blocking(move || panel.delete(id)).await {
        Ok(Ok(rule)) => (StatusCode::OK, Json(serde_json::json!({"result": "ok", "removed": rule}))).into_response(),
        Ok(Err(e)) => panel_error(e),
        Err(code) => code.into_response(),
    }
}

async fn api_apply(State(state): State<AppState>) -> Response {
    let panel = state.panel.clone();
    match blocking(move || panel.apply()).await {
        Ok(Ok(SyncOutcome::Stopped)) => {
            Json(serde_json::json!({"result": "ok", "service": "stopped", "rules": 0})).into_response()
        }
        Ok(Ok(SyncOutcome::Restarted { rules })) => {
            Json(serde_json::json!({"result": "ok", "service": "restarted", "rules": rules})).into_response()
        }
        Ok(Err(e)) => {
            error!("apply failed: {e:#}");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
        Err(code) => code.into_response(),
    }
}

fn panel_error(e: PanelError) -> Response {
    let status = match &e {
        PanelError::Rule(_) => StatusCode::BAD_REQUEST,
        PanelError::Store(StoreError::IndexOutOfRange { .. }) => StatusCode::NOT_FOUND,
        PanelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_json(status, e.to_string())
}

fn error_json(status: StatusCode, msg: String) -> Response {
    (status, Json(serde_json::json!({"error": msg}))).into_response()
}
