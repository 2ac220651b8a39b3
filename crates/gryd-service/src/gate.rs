//! Admission gate for on-chain operations.
//!
//! At most one gated request runs at a time. A request arriving while the
//! slot is taken is rejected with 429 immediately instead of waiting.

use axum::{
	extract::{Request, State},
	middleware::Next,
	response::Response,
};
use gryd_types::APIError;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AdmissionGate {
	permits: Arc<Semaphore>,
}

impl AdmissionGate {
	pub fn new() -> Self {
		Self {
			permits: Arc::new(Semaphore::new(1)),
		}
	}
}

impl Default for AdmissionGate {
	fn default() -> Self {
		Self::new()
	}
}

/// Middleware holding the gate's permit for the whole request.
pub async fn admission(
	State(gate): State<AdmissionGate>,
	request: Request,
	next: Next,
) -> Result<Response, APIError> {
	let _permit = gate.permits.clone().try_acquire_owned().map_err(|_| {
		tracing::debug!(path = %request.uri().path(), "Admission gate occupied");
		APIError::TooManyRequests {
			error_type: "GATE_OCCUPIED".to_string(),
			message: "simultaneous on-chain operations not supported".to_string(),
			retry_after: Some(1),
		}
	})?;

	Ok(next.run(request).await)
}
