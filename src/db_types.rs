use serde::Serialize;
use serde_json::Value;
use sqlx::types::time::OffsetDateTime;
use uuid::Uuid;

/// One archived call: who was called, what was pitched, where the audio is, and (once
/// attached) what was said.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CallRecord {
    pub id: Uuid,
    pub call_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub customer_id: Option<String>,
    pub product_name: Option<String>,
    pub recording_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub segments: sqlx::types::Json<Vec<String>>,
    pub transcript: Option<sqlx::types::Json<Value>>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewCallRecord {
    /// Dispatch id of the call; unique per record.
    pub call_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub customer_id: Option<String>,
    pub product_name: Option<String>,
    pub recording_id: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub segments: Vec<String>,
}

/// Callback the customer agreed to during a call.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FollowUpRequest {
    pub id: Uuid,
    pub call_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub customer_id: Option<String>,
    pub product_name: Option<String>,
    pub preferred_time: String,
    pub note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewFollowUp {
    pub call_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub customer_id: Option<String>,
    pub product_name: Option<String>,
    pub preferred_time: String,
    pub note: Option<String>,
}
