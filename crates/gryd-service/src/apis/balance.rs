//! Contract balance endpoint.

use axum::{
	http::header,
	response::{IntoResponse, Response},
};
use gryd_core::StorageOrchestrator;
use gryd_types::APIError;

/// Handles GET /balance/get.
///
/// The body is the balance as a bare JSON number, written from its decimal
/// form so values above `u64` keep full precision.
pub async fn get_balance(orchestrator: &StorageOrchestrator) -> Result<Response, APIError> {
	let balance = orchestrator.get_balance().await.map_err(super::api_error)?;
	Ok(([(header::CONTENT_TYPE, "application/json")], balance.to_string()).into_response())
}
