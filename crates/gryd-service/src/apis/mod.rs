//! Endpoint implementations behind the HTTP server.

pub mod balance;
pub mod storage;

use gryd_contract::ContractError;
use gryd_core::{ErrorClass, OrchestratorError};
use gryd_types::APIError;

/// Maps an orchestrator failure onto its outward status.
///
/// Internal failures are logged here and reported without their cause.
pub(crate) fn api_error(error: OrchestratorError) -> APIError {
	match error.class() {
		ErrorClass::InvalidInput => APIError::BadRequest {
			error_type: "INVALID_INPUT".to_string(),
			message: error.to_string(),
			details: None,
		},
		ErrorClass::Unauthorized => APIError::BadRequest {
			error_type: "UNAUTHORIZED".to_string(),
			message: "cannot verify event for tx".to_string(),
			details: None,
		},
		ErrorClass::NotFound => {
			let (error_type, message) = match &error {
				OrchestratorError::Contract(ContractError::EventNotFound(_)) => {
					("EVENT_NOT_FOUND", "event not found")
				},
				OrchestratorError::Contract(ContractError::NoTopic(_)) => {
					("NO_TOPIC", "event cannot be processed")
				},
				OrchestratorError::Contract(_) => (
					"UNPROCESSABLE_EVENT",
					"tx receipt or event does not exist for hash",
				),
				_ => ("RECORD_NOT_FOUND", "record not found"),
			};
			tracing::info!("{}", error);
			APIError::NotFound {
				error_type: error_type.to_string(),
				message: message.to_string(),
			}
		},
		ErrorClass::Internal => {
			tracing::error!(error = %error, "Internal server error");
			APIError::InternalServerError {
				error_type: "INTERNAL_ERROR".to_string(),
				message: "internal server error".to_string(),
			}
		},
	}
}
