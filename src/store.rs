use crate::db_types::{CallRecord, FollowUpRequest, NewCallRecord, NewFollowUp};
use crate::error::StoreError;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use std::sync::Mutex;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, call_id, customer_name, phone_number, customer_id, \
     product_name, recording_id, started_at, ended_at, segments, transcript, created";

/// Persistence for call archives and follow-up requests.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Insert the record for a call.  Inserting a second record for the same `call_id`
    /// returns the id of the existing one instead.
    async fn insert_call_record(&self, record: &NewCallRecord) -> Result<Uuid, StoreError>;

    /// Attach a transcript to a record that has none yet.  Returns false when the record
    /// already had one.
    async fn attach_transcript(&self, id: Uuid, transcript: &Value) -> Result<bool, StoreError>;

    /// Most recent first.
    async fn list_call_records(&self) -> Result<Vec<CallRecord>, StoreError>;

    async fn find_by_recording_id(
        &self,
        recording_id: &str,
    ) -> Result<Option<CallRecord>, StoreError>;

    async fn insert_follow_up(&self, follow_up: &NewFollowUp) -> Result<Uuid, StoreError>;
}

pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database connected and migrated");
        Ok(Self { pool })
    }
}

#[async_trait]
impl CallStore for PgStore {
    async fn insert_call_record(&self, record: &NewCallRecord) -> Result<Uuid, StoreError> {
        let (id,): (Uuid,) = sqlx::query_as(
            "
            insert into call_records
                (id, call_id, customer_name, phone_number, customer_id, product_name,
                 recording_id, started_at, ended_at, segments)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            on conflict (call_id) do update set call_id = excluded.call_id
            returning id
            ",
        )
        .bind(Uuid::new_v4())
        .bind(&record.call_id)
        .bind(&record.customer_name)
        .bind(&record.phone_number)
        .bind(&record.customer_id)
        .bind(&record.product_name)
        .bind(&record.recording_id)
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(Json(&record.segments))
        .fetch_one(&self.pool)
        .await?;
        debug!(id=%id, call_id=%record.call_id, "call record stored");
        Ok(id)
    }

    async fn attach_transcript(&self, id: Uuid, transcript: &Value) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "
            update call_records
            set transcript = $2
            where id = $1 and transcript is null
            ",
        )
        .bind(id)
        .bind(Json(transcript))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_call_records(&self) -> Result<Vec<CallRecord>, StoreError> {
        let records = sqlx::query_as::<_, CallRecord>(&format!(
            "select {RECORD_COLUMNS} from call_records order by created desc"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn find_by_recording_id(
        &self,
        recording_id: &str,
    ) -> Result<Option<CallRecord>, StoreError> {
        let record = sqlx::query_as::<_, CallRecord>(&format!(
            "select {RECORD_COLUMNS} from call_records where recording_id = $1 \
             order by created desc limit 1"
        ))
        .bind(recording_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert_follow_up(&self, follow_up: &NewFollowUp) -> Result<Uuid, StoreError> {
        let (id,): (Uuid,) = sqlx::query_as(
            "
            insert into follow_ups
                (id, call_id, customer_name, phone_number, customer_id, product_name,
                 preferred_time, note)
            values ($1, $2, $3, $4, $5, $6, $7, $8)
            returning id
            ",
        )
        .bind(Uuid::new_v4())
        .bind(&follow_up.call_id)
        .bind(&follow_up.customer_name)
        .bind(&follow_up.phone_number)
        .bind(&follow_up.customer_id)
        .bind(&follow_up.product_name)
        .bind(&follow_up.preferred_time)
        .bind(&follow_up.note)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CallRecord>>,
    follow_ups: Mutex<Vec<FollowUpRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_records(&self) -> Vec<CallRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn follow_ups(&self) -> Vec<FollowUpRequest> {
        self.follow_ups.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn insert_call_record(&self, record: &NewCallRecord) -> Result<Uuid, StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(existing) = records.iter().find(|r| r.call_id == record.call_id) {
            return Ok(existing.id);
        }
        let id = Uuid::new_v4();
        records.push(CallRecord {
            id,
            call_id: record.call_id.clone(),
            customer_name: record.customer_name.clone(),
            phone_number: record.phone_number.clone(),
            customer_id: record.customer_id.clone(),
            product_name: record.product_name.clone(),
            recording_id: record.recording_id.clone(),
            started_at: record.started_at,
            ended_at: record.ended_at,
            segments: Json(record.segments.clone()),
            transcript: None,
            created: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    async fn attach_transcript(&self, id: Uuid, transcript: &Value) -> Result<bool, StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.transcript.is_some() {
            return Ok(false);
        }
        record.transcript = Some(Json(transcript.clone()));
        Ok(true)
    }

    async fn list_call_records(&self) -> Result<Vec<CallRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.iter().rev().cloned().collect())
    }

    async fn find_by_recording_id(
        &self,
        recording_id: &str,
    ) -> Result<Option<CallRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .iter()
            .rev()
            .find(|r| r.recording_id.as_deref() == Some(recording_id))
            .cloned())
    }

    async fn insert_follow_up(&self, follow_up: &NewFollowUp) -> Result<Uuid, StoreError> {
        let mut follow_ups = self.follow_ups.lock().map_err(|_| StoreError::Poisoned)?;
        let id = Uuid::new_v4();
        follow_ups.push(FollowUpRequest {
            id,
            call_id: follow_up.call_id.clone(),
            customer_name: follow_up.customer_name.clone(),
            phone_number: follow_up.phone_number.clone(),
            customer_id: follow_up.customer_id.clone(),
            product_name: follow_up.product_name.clone(),
            preferred_time: follow_up.preferred_time.clone(),
            note: follow_up.note.clone(),
            created: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_record(call_id: &str) -> NewCallRecord {
        NewCallRecord {
            call_id: call_id.to_string(),
            customer_name: "Asha".to_string(),
            phone_number: "+919547234545".to_string(),
            customer_id: Some("15634602".to_string()),
            product_name: Some("Gold Saver".to_string()),
            recording_id: Some("EG_1".to_string()),
            started_at: None,
            ended_at: None,
            segments: vec!["https://a/recordings/s0.ts".to_string()],
        }
    }

    #[tokio::test]
    async fn inserting_same_call_twice_keeps_one_record() {
        let store = MemoryStore::new();
        let first = store.insert_call_record(&new_record("d1")).await.unwrap();
        let second = store.insert_call_record(&new_record("d1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.call_records().len(), 1);
    }

    #[tokio::test]
    async fn transcript_attaches_once() {
        let store = MemoryStore::new();
        let id = store.insert_call_record(&new_record("d1")).await.unwrap();
        assert!(store.attach_transcript(id, &json!({"items": []})).await.unwrap());
        assert!(!store.attach_transcript(id, &json!({"items": [1]})).await.unwrap());
        let record = store.find_by_recording_id("EG_1").await.unwrap().unwrap();
        assert_eq!(record.transcript.unwrap().0, json!({"items": []}));
    }

    #[tokio::test]
    async fn attaching_to_unknown_record_fails() {
        let store = MemoryStore::new();
        let res = store.attach_transcript(Uuid::new_v4(), &json!({})).await;
        assert!(matches!(res, Err(StoreError::NotFound(_))));
    }
}
