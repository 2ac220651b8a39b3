//! Dataset upload and retrieval endpoints.
//!
//! Uploads arrive as multipart forms carrying the CSV `file` together with
//! the paying `wallet` and the payment `txHash`.

use axum::extract::Multipart;
use gryd_core::StorageOrchestrator;
use gryd_types::{APIError, ConfirmationRecord, DatasetRow, RowInput};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CsvError {
	#[error("line {line}: expected at least 4 fields, found {found}")]
	MissingFields { line: u64, found: usize },
	#[error(transparent)]
	Parse(#[from] csv::Error),
}

/// Fields of one upload form.
#[derive(Debug, Default)]
struct UploadForm {
	file: Option<String>,
	wallet: String,
	tx_hash: String,
}

/// Handles POST /storage/create.
pub async fn create(
	orchestrator: &StorageOrchestrator,
	multipart: Multipart,
) -> Result<ConfirmationRecord, APIError> {
	let form = read_form(multipart).await?;
	let file = form.file.ok_or_else(|| bad_request("INVALID_FORM", "missing file field"))?;
	let rows = parse_csv(&file).map_err(|e| {
		tracing::info!("Rejected dataset upload: {}", e);
		APIError::BadRequest {
			error_type: "INVALID_CSV".to_string(),
			message: "unable to parse form data".to_string(),
			details: Some(serde_json::json!({ "reason": e.to_string() })),
		}
	})?;

	orchestrator
		.create(&form.wallet, &form.tx_hash, rows)
		.await
		.map_err(super::api_error)
}

/// Handles GET /storage/get/{id}.
pub async fn get_record(orchestrator: &StorageOrchestrator, id: &str) -> Result<DatasetRow, APIError> {
	orchestrator.record_by_id(id).await.map_err(super::api_error)
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, APIError> {
	let mut form = UploadForm::default();

	while let Some(field) = multipart.next_field().await.map_err(|e| {
		tracing::info!("Unable to parse form data: {}", e);
		bad_request("INVALID_FORM", "unable to parse form data")
	})? {
		let name = field.name().unwrap_or_default().to_string();
		let value = field
			.text()
			.await
			.map_err(|_| bad_request("INVALID_FORM", "unable to parse form data"))?;

		match name.as_str() {
			"file" => form.file = Some(value),
			"wallet" => form.wallet = value,
			"txHash" => form.tx_hash = value,
			_ => {},
		}
	}

	Ok(form)
}

fn bad_request(error_type: &str, message: &str) -> APIError {
	APIError::BadRequest {
		error_type: error_type.to_string(),
		message: message.to_string(),
		details: None,
	}
}

/// Parses `[dataset, date, dataType, data]` rows without a header.
///
/// Blank lines are skipped and fields past the fourth ignored.
pub fn parse_csv(input: &str) -> Result<Vec<RowInput>, CsvError> {
	let mut reader = csv::ReaderBuilder::new()
		.has_headers(false)
		.flexible(true)
		.from_reader(input.as_bytes());

	let mut rows = Vec::new();
	for record in reader.records() {
		let record = record?;
		if record.len() < 4 {
			return Err(CsvError::MissingFields {
				line: record.position().map_or(0, |p| p.line()),
				found: record.len(),
			});
		}
		rows.push(RowInput {
			dataset: record[0].to_string(),
			date: record[1].to_string(),
			data_type: record[2].to_string(),
			data: record[3].to_string(),
		});
	}

	Ok(rows)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parses_plain_rows() {
		let rows = parse_csv("weather,2024-01-01,temperature,21.5\nweather,2024-01-02,temperature,19.0\n")
			.unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[1].date, "2024-01-02");
		assert_eq!(rows[1].data, "19.0");
	}

	#[test]
	fn test_quoted_fields_and_escapes() {
		let rows = parse_csv("\"sales, eu\",2024-03-01,json,\"{\"\"total\"\": 3}\"\r\n").unwrap();
		assert_eq!(rows[0].dataset, "sales, eu");
		assert_eq!(rows[0].data, "{\"total\": 3}");
	}

	#[test]
	fn test_quoted_newline_stays_in_field() {
		let rows = parse_csv("notes,2024-01-01,text,\"line one\nline two\"\nnotes,2024-01-02,text,x").unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].data, "line one\nline two");
	}

	#[test]
	fn test_blank_lines_skipped() {
		let rows = parse_csv("\na,b,c,d\n\n").unwrap();
		assert_eq!(rows.len(), 1);
	}

	#[test]
	fn test_short_row_rejected() {
		assert!(matches!(
			parse_csv("a,b,c,d\na,b\n"),
			Err(CsvError::MissingFields { line: 2, found: 2 })
		));
	}

	#[test]
	fn test_extra_fields_ignored() {
		let rows = parse_csv("a,b,c,d,e,f\n").unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].data, "d");
	}

	#[test]
	fn test_empty_file_has_no_rows() {
		assert!(parse_csv("").unwrap().is_empty());
	}
}
