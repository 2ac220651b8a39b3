//! HTTP server for the gryd node.

use crate::gate::{admission, AdmissionGate};
use axum::{
	extract::{DefaultBodyLimit, Multipart, Path, State},
	http::{HeaderName, HeaderValue, Method},
	middleware,
	response::{Json, Response},
	routing::{get, post},
	Router,
};
use gryd_config::{ApiConfig, CorsConfig};
use gryd_core::{GrydNode, StorageOrchestrator};
use gryd_types::{APIError, ConfirmationRecord, DatasetRow};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
	cors::{Any, CorsLayer},
	timeout::TimeoutLayer,
	trace::TraceLayer,
};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub orchestrator: Arc<StorageOrchestrator>,
}

/// Starts the HTTP server and serves until the listener fails.
pub async fn start_server(
	api_config: ApiConfig,
	node: Arc<GrydNode>,
) -> Result<(), Box<dyn std::error::Error>> {
	let state = AppState {
		orchestrator: node.orchestrator().clone(),
	};
	let app = router(state, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("gryd API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Builds the router; create and balance run behind the admission gate.
pub fn router(state: AppState, api_config: &ApiConfig) -> Router {
	let gated = Router::new()
		.route("/storage/create", post(handle_create))
		.route("/balance/get", get(handle_balance))
		.route_layer(middleware::from_fn_with_state(AdmissionGate::new(), admission));

	Router::new()
		.merge(gated)
		.route("/storage/get/{id}", get(handle_get_record))
		.layer(DefaultBodyLimit::max(api_config.max_request_size))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(TimeoutLayer::new(Duration::from_secs(api_config.timeout_seconds)))
				.layer(cors_layer(api_config.cors.as_ref())),
		)
		.with_state(state)
}

fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};

	let mut layer = CorsLayer::new();
	layer = if cors.allowed_origins.iter().any(|o| o == "*") {
		layer.allow_origin(Any)
	} else {
		layer.allow_origin(
			cors.allowed_origins
				.iter()
				.filter_map(|o| HeaderValue::from_str(o).ok())
				.collect::<Vec<_>>(),
		)
	};
	layer = if cors.allowed_headers.iter().any(|h| h == "*") {
		layer.allow_headers(Any)
	} else {
		layer.allow_headers(
			cors.allowed_headers
				.iter()
				.filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
				.collect::<Vec<_>>(),
		)
	};
	layer.allow_methods(
		cors.allowed_methods
			.iter()
			.filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
			.collect::<Vec<_>>(),
	)
}

/// Handles POST /storage/create requests.
async fn handle_create(
	State(state): State<AppState>,
	multipart: Multipart,
) -> Result<Json<ConfirmationRecord>, APIError> {
	crate::apis::storage::create(&state.orchestrator, multipart)
		.await
		.map(Json)
}

/// Handles GET /storage/get/{id} requests.
async fn handle_get_record(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<DatasetRow>, APIError> {
	crate::apis::storage::get_record(&state.orchestrator, &id)
		.await
		.map(Json)
}

/// Handles GET /balance/get requests.
async fn handle_balance(State(state): State<AppState>) -> Result<Response, APIError> {
	crate::apis::balance::get_balance(&state.orchestrator).await
}
