//! Axum JSON read API over the published (`final`) tier.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use rezone_core::{RecordType, ZoningStatus};
use rezone_storage::{CityFilter, Page, RecordsQuery, RecordsRepository, StoreError, Tier};
use rezone_sync::{building_type_breakdown, date_field_for_status};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rezone-web";

#[derive(Clone)]
pub struct AppState {
    query: RecordsQuery,
}

impl AppState {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            query: RecordsQuery::new(RecordsRepository::new(data_dir, Tier::Final)),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    city: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

impl ListQuery {
    fn city(&self) -> Option<CityFilter> {
        self.city.as_deref().and_then(CityFilter::parse)
    }

    fn page(&self) -> Page {
        Page {
            offset: self.offset,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct BreakdownQuery {
    #[serde(rename = "type")]
    record_type: Option<String>,
    status: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/api/v1/rezonings", get(rezonings_handler))
        .route("/api/v1/developmentPermits", get(development_permits_handler))
        .route("/api/v1/records/{id}", get(record_handler))
        .route("/api/v1/analytics/buildingType", get(building_type_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("REZONE_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let data_dir = std::env::var("REZONE_DATA_DIR").unwrap_or_else(|_| "./database".into());
    let state = AppState::new(data_dir);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving read API");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn ping_handler() -> Response {
    Json(json!({ "data": "Hello world", "date": Utc::now() })).into_response()
}

async fn rezonings_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.query.rezonings(query.city(), query.page()).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => store_error(err),
    }
}

async fn development_permits_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state
        .query
        .development_permits(query.city(), query.page())
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => store_error(err),
    }
}

async fn record_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let Ok(id) = id.parse::<Uuid>() else {
        return json_error(StatusCode::NOT_FOUND, format!("record {id} not found"));
    };
    match state.query.record_by_id(id).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => store_error(err),
    }
}

async fn building_type_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BreakdownQuery>,
) -> Response {
    let record_type = match query.record_type.as_deref().map(str::parse::<RecordType>) {
        None => RecordType::Rezoning,
        Some(Ok(t)) => t,
        Some(Err(err)) => return json_error(StatusCode::BAD_REQUEST, err),
    };
    let status = match query.status.as_deref().map(str::parse::<ZoningStatus>) {
        None => ZoningStatus::Applied,
        Some(Ok(s)) => s,
        Some(Err(err)) => return json_error(StatusCode::BAD_REQUEST, err),
    };
    let Some(date_field) = date_field_for_status(status) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            format!("status `{status}` has no milestone date"),
        );
    };

    match state
        .query
        .records(record_type.into(), &Default::default(), Page::default())
        .await
    {
        Ok(page) => {
            let data = building_type_breakdown(&page.data, date_field, status);
            Json(json!({ "data": data })).into_response()
        }
        Err(err) => store_error(err),
    }
}

fn store_error(err: StoreError) -> Response {
    match err {
        StoreError::NotFound { id, .. } => {
            json_error(StatusCode::NOT_FOUND, format!("record {id} not found"))
        }
        other => {
            error!(error = %other, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
