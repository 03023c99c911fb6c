use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::dates;
use crate::models::{Assessment, PhoneLog};

/// Request timeout on the callback transport; the direct transport relies on
/// the caller's patience, as the original did.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Date columns rewritten to `DD/MM/YYYY` before transmission.
const ASSESSMENT_DATE_KEYS: [&str; 3] = ["assessment_date", "followup_due", "first_date_5fu"];
const PHONE_LOG_DATE_KEYS: [&str; 2] = ["call_time", "next_due"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("WEBAPP_URL is not set")]
    MissingBaseUrl,
    #[error("record not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("conflict")]
    Conflict,
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    Http(u16),
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(error.to_string())
        }
    }
}

/// Map a transport status to an error category; `None` for success statuses.
pub fn categorize_status(status: u16) -> Option<ApiError> {
    match status {
        200..=299 => None,
        404 => Some(ApiError::NotFound),
        403 => Some(ApiError::PermissionDenied),
        409 => Some(ApiError::Conflict),
        408 => Some(ApiError::Timeout),
        other => Some(ApiError::Http(other)),
    }
}

/// User-facing message for a failed delete. Not-found is not listed: callers
/// treat it as an already-deleted success.
pub fn delete_failure_message(error: &ApiError) -> &'static str {
    match error {
        ApiError::NotFound => "Record no longer exists.",
        ApiError::PermissionDenied => "You don’t have permission to delete this record.",
        ApiError::Timeout | ApiError::Network(_) => "Network error. Please try again.",
        ApiError::Conflict => "Conflict detected. Please refresh and try again.",
        _ => "Failed to delete. Please try again.",
    }
}

pub fn save_failure_message(error: &ApiError) -> &'static str {
    match error {
        ApiError::NotFound => "Record no longer exists. Refresh and try again.",
        ApiError::PermissionDenied => "You don’t have permission to save this record.",
        ApiError::Timeout | ApiError::Network(_) => "Network error. Please try again.",
        ApiError::Conflict => "Conflict detected. Please refresh and try again.",
        _ => "Failed to save. Please try again.",
    }
}

/// How requests reach the web app. `Callback` is the GET-only JSONP-style
/// path for deployments where cross-origin rules block the direct one; the
/// two are semantically identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Direct,
    Callback,
}

/// List payloads arrive either as a bare array or wrapped in `rows`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Rows(Vec<T>),
    Wrapped {
        #[serde(default = "Vec::new")]
        rows: Vec<T>,
    },
}

impl<T> ListResponse<T> {
    fn into_rows(self) -> Vec<T> {
        match self {
            ListResponse::Rows(rows) | ListResponse::Wrapped { rows } => rows,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AckResponse {
    ok: Option<bool>,
    error: Option<String>,
    message: Option<String>,
}

impl AckResponse {
    /// `ok != false` counts as success; a missing body does too.
    fn into_result(self) -> Result<(), ApiError> {
        if self.ok == Some(false) {
            let message = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "request failed".to_string());
            return Err(ApiError::Rejected(message));
        }
        Ok(())
    }
}

/// Rewrite the named keys of a JSON object to canonical `DD/MM/YYYY`.
pub fn map_payload_dates(mut payload: serde_json::Value, keys: &[&str]) -> serde_json::Value {
    if let serde_json::Value::Object(map) = &mut payload {
        for key in keys {
            if let Some(value) = map.get(*key) {
                let mapped = dates::normalize_value(value);
                map.insert((*key).to_string(), serde_json::Value::String(mapped));
            }
        }
    }
    payload
}

/// Unwrap a `cb_x(...)` callback-transport body down to its JSON payload.
pub fn unwrap_callback_body(body: &str, callback: &str) -> Result<serde_json::Value, ApiError> {
    let trimmed = body.trim();
    let inner = trimmed
        .strip_prefix(callback)
        .and_then(|rest| rest.trim_start().strip_prefix('('))
        .and_then(|rest| rest.trim_end().strip_suffix(')'))
        .ok_or_else(|| ApiError::InvalidResponse("malformed callback body".to_string()))?;
    Ok(serde_json::from_str(inner)?)
}

/// Fields identifying one phone log for deletion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeletePhoneLog {
    pub id: String,
    pub log_id: String,
    pub call_time: String,
}

/// Client for the spreadsheet-backed web app.
pub struct SheetsClient {
    base_url: String,
    transport: Transport,
    http: reqwest::Client,
}

impl SheetsClient {
    pub fn new(base_url: impl Into<String>, transport: Transport) -> Result<Self, ApiError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(ApiError::MissingBaseUrl);
        }
        Ok(Self {
            base_url,
            transport,
            http: reqwest::Client::new(),
        })
    }

    /// Generated id for a brand-new phone log.
    pub fn new_log_id() -> String {
        format!("log_{}", Uuid::new_v4().simple())
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<serde_json::Value, ApiError> {
        let response = self.http.get(&self.base_url).query(params).send().await?;
        if let Some(error) = categorize_status(response.status().as_u16()) {
            return Err(error);
        }
        Ok(response.json().await?)
    }

    async fn post(
        &self,
        params: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        let response = self
            .http
            .post(&self.base_url)
            .query(params)
            .json(body)
            .send()
            .await?;
        if let Some(error) = categorize_status(response.status().as_u16()) {
            return Err(error);
        }
        Ok(response.json().await?)
    }

    /// Callback transport: everything rides a GET, the payload base64-encoded
    /// in `data`, the response wrapped in a generated callback name.
    async fn get_callback(
        &self,
        mut params: Vec<(&str, String)>,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ApiError> {
        let callback = format!("cb_{}", Uuid::new_v4().simple());
        params.push(("callback", callback.clone()));
        if let Some(body) = body {
            params.push(("data", BASE64.encode(serde_json::to_string(body)?)));
        }
        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .timeout(CALLBACK_TIMEOUT)
            .send()
            .await?;
        if let Some(error) = categorize_status(response.status().as_u16()) {
            return Err(error);
        }
        let text = response.text().await?;
        unwrap_callback_body(&text, &callback)
    }

    async fn list<T: DeserializeOwned>(
        &self,
        params: Vec<(&str, String)>,
    ) -> Result<Vec<T>, ApiError> {
        let value = match self.transport {
            Transport::Direct => self.get(&params).await?,
            Transport::Callback => self.get_callback(params, None).await?,
        };
        let parsed: ListResponse<T> = serde_json::from_value(value)?;
        Ok(parsed.into_rows())
    }

    async fn mutate(
        &self,
        params: Vec<(&str, String)>,
        body: serde_json::Value,
    ) -> Result<(), ApiError> {
        let value = match self.transport {
            Transport::Direct => self.post(&params, &body).await?,
            Transport::Callback => self.get_callback(params, Some(&body)).await?,
        };
        let ack: AckResponse = serde_json::from_value(value).unwrap_or_default();
        ack.into_result()
    }

    /// All saved assessments, display dates canonicalized.
    pub async fn list_assessments(&self) -> Result<Vec<Assessment>, ApiError> {
        let mut rows: Vec<Assessment> = self
            .list(vec![("action", "listAssessments".to_string())])
            .await?;
        for row in &mut rows {
            row.normalize_dates();
        }
        Ok(rows)
    }

    /// Save a full assessment record (also the patch path: the web app merges
    /// by `id`).
    pub async fn save_assessment(&self, record: &serde_json::Value) -> Result<(), ApiError> {
        let payload = map_payload_dates(record.clone(), &ASSESSMENT_DATE_KEYS);
        self.mutate(vec![("action", "saveAssessment".to_string())], payload)
            .await
    }

    pub async fn update_assessment_fields(
        &self,
        id: &str,
        patch: &[(String, String)],
    ) -> Result<(), ApiError> {
        let mut map = serde_json::Map::new();
        map.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        for (key, value) in patch {
            map.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        self.save_assessment(&serde_json::Value::Object(map)).await
    }

    /// Delete an assessment and its phone logs.
    pub async fn delete_assessment_cascade(&self, id: &str) -> Result<(), ApiError> {
        self.mutate(
            vec![
                ("action", "deleteAssessmentCascade".to_string()),
                ("id", id.to_string()),
            ],
            serde_json::json!({ "id": id }),
        )
        .await
    }

    pub async fn list_phone_logs(&self, patient_id: &str) -> Result<Vec<PhoneLog>, ApiError> {
        self.list(vec![
            ("action", "listPhoneLogs".to_string()),
            ("id", patient_id.to_string()),
        ])
        .await
    }

    /// Single request for every phone log; the whole-result and dashboard
    /// paths prefer this over per-patient fetches.
    pub async fn list_phone_logs_all(&self) -> Result<Vec<PhoneLog>, ApiError> {
        self.list(vec![("action", "listPhoneLogsAll".to_string())])
            .await
    }

    pub async fn save_phone_log(&self, log: &PhoneLog) -> Result<(), ApiError> {
        let payload = map_payload_dates(serde_json::to_value(log)?, &PHONE_LOG_DATE_KEYS);
        self.mutate(vec![("action", "savePhoneLog".to_string())], payload)
            .await
    }

    pub async fn delete_phone_log(&self, request: &DeletePhoneLog) -> Result<(), ApiError> {
        if request.log_id.trim().is_empty() {
            return Err(ApiError::InvalidResponse("log_id is required".to_string()));
        }
        self.mutate(
            vec![("action", "deletePhoneLog".to_string())],
            serde_json::to_value(request)?,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_categories() {
        assert!(categorize_status(200).is_none());
        assert!(matches!(categorize_status(404), Some(ApiError::NotFound)));
        assert!(matches!(
            categorize_status(403),
            Some(ApiError::PermissionDenied)
        ));
        assert!(matches!(categorize_status(409), Some(ApiError::Conflict)));
        assert!(matches!(categorize_status(408), Some(ApiError::Timeout)));
        assert!(matches!(categorize_status(500), Some(ApiError::Http(500))));
    }

    #[test]
    fn delete_messages_are_distinct_per_category() {
        assert_eq!(
            delete_failure_message(&ApiError::NotFound),
            "Record no longer exists."
        );
        assert_ne!(
            delete_failure_message(&ApiError::PermissionDenied),
            delete_failure_message(&ApiError::Conflict)
        );
        assert_eq!(
            delete_failure_message(&ApiError::Timeout),
            delete_failure_message(&ApiError::Network("down".to_string()))
        );
    }

    #[test]
    fn payload_dates_are_serialized_dmy() {
        let payload = serde_json::json!({
            "id": "7",
            "assessment_date": "2024-03-05",
            "followup_due": "2024-03-19T08:00:00Z",
            "notes": "2024-01-01 mentioned in text",
        });
        let mapped = map_payload_dates(payload, &ASSESSMENT_DATE_KEYS);
        assert_eq!(mapped["assessment_date"], "05/03/2024");
        assert_eq!(mapped["followup_due"], "19/03/2024");
        // Only date columns are rewritten.
        assert_eq!(mapped["notes"], "2024-01-01 mentioned in text");
        assert_eq!(mapped["id"], "7");
    }

    #[test]
    fn phone_log_payload_maps_call_time_and_next_due() {
        let mut log = PhoneLog::default();
        log.log_id = "log_1".into();
        log.call_time = "2024-03-05T09:30:00Z".into();
        log.next_due = "2024-03-19".into();
        let payload =
            map_payload_dates(serde_json::to_value(&log).unwrap(), &PHONE_LOG_DATE_KEYS);
        assert_eq!(payload["call_time"], "05/03/2024");
        assert_eq!(payload["next_due"], "19/03/2024");
    }

    #[test]
    fn callback_bodies_unwrap_to_json() {
        let value = unwrap_callback_body("cb_abc({\"ok\":true})", "cb_abc").unwrap();
        assert_eq!(value["ok"], true);
        let value = unwrap_callback_body("  cb_abc ( [1,2] ) ", "cb_abc").unwrap();
        assert_eq!(value[1], 2);
        assert!(unwrap_callback_body("other({})", "cb_abc").is_err());
        assert!(unwrap_callback_body("cb_abc{}", "cb_abc").is_err());
    }

    #[test]
    fn list_responses_accept_both_shapes() {
        let bare: ListResponse<PhoneLog> = serde_json::from_str("[{\"id\":\"1\"}]").unwrap();
        assert_eq!(bare.into_rows().len(), 1);
        let wrapped: ListResponse<PhoneLog> =
            serde_json::from_str("{\"rows\":[{\"id\":\"1\"},{\"id\":\"2\"}]}").unwrap();
        assert_eq!(wrapped.into_rows().len(), 2);
    }

    #[test]
    fn ack_treats_missing_ok_as_success() {
        let ack: AckResponse = serde_json::from_str("{}").unwrap();
        assert!(ack.into_result().is_ok());
        let ack: AckResponse = serde_json::from_str("{\"ok\":true}").unwrap();
        assert!(ack.into_result().is_ok());
        let ack: AckResponse =
            serde_json::from_str("{\"ok\":false,\"error\":\"row locked\"}").unwrap();
        match ack.into_result() {
            Err(ApiError::Rejected(message)) => assert_eq!(message, "row locked"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(matches!(
            SheetsClient::new("", Transport::Direct),
            Err(ApiError::MissingBaseUrl)
        ));
        assert!(SheetsClient::new("https://example.test/exec", Transport::Callback).is_ok());
    }

    #[test]
    fn new_log_ids_are_unique() {
        assert_ne!(SheetsClient::new_log_id(), SheetsClient::new_log_id());
        assert!(SheetsClient::new_log_id().starts_with("log_"));
    }
}
