use crate::conversation_state::PitchTier;
use crate::coordinator::CallCoordinator;
use crate::dispatch::DispatchRegistry;
use crate::error::DispatchError;
use crate::store::CallStore;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Who said a line of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// A single line of the conversation, as heard (caller) or spoken (agent)
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub at: OffsetDateTime,
}

impl ConversationTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            at: OffsetDateTime::now_utc(),
        }
    }
}

/// Append-only transcript of one call.  The conversation task is the only writer; teardown
/// jobs take read snapshots.
pub type SharedTranscript = Arc<RwLock<Vec<ConversationTurn>>>;

/// Free-form customer attributes as they arrive from the dispatch request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerProfile(pub Map<String, Value>);

impl CustomerProfile {
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Array(items) if !items.is_empty() => Some(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => None,
        }
    }

    /// Value rendered for the agent's context, or "Not available".
    pub fn display(&self, key: &str) -> String {
        self.get_text(key)
            .unwrap_or_else(|| "Not available".to_string())
    }

    /// Boolean-ish attributes are sent as `1`/`0`, `true`/`false` or "yes"/"no".
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "1" | "yes" | "true"),
            _ => false,
        }
    }

    pub fn customer_id(&self) -> Option<String> {
        self.get_text("customerId")
    }
}

/// One of the ranked product offers for a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCandidate {
    pub name: String,
    pub category: String,
    pub risk_level: String,
    pub description: String,
}

/// Everything needed to place and drive a single outbound call.  Immutable once the session
/// starts.
#[derive(Debug, Clone)]
pub struct CallJob {
    pub call_id: String,
    pub room: String,
    pub phone_number: String,
    pub customer_name: String,
    pub language: String,
    pub profile: CustomerProfile,
    /// Ranked best-first, between one and three entries.
    pub products: Vec<ProductCandidate>,
    pub created_at: OffsetDateTime,
}

impl CallJob {
    pub fn product(&self, tier: PitchTier) -> Option<&ProductCandidate> {
        self.products.get(tier.index())
    }

    pub fn primary_product_name(&self) -> Option<&str> {
        self.products.first().map(|p| p.name.as_str())
    }
}

/// Body of `POST /create-dispatch`.  Field names follow the dispatch metadata format used by
/// the call-list front end.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub phone_number: Option<String>,
    #[serde(default)]
    pub cust_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub cust_details: Map<String, Value>,
    #[serde(default)]
    pub product_details: Map<String, Value>,
}

impl DispatchRequest {
    pub fn into_job(
        self,
        default_language: &str,
        call_id: String,
        room: String,
    ) -> Result<CallJob, DispatchError> {
        let phone_number = self
            .phone_number
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DispatchError::InvalidRequest("phone_number is required".into()))?;
        if !is_dialable(&phone_number) {
            return Err(DispatchError::InvalidRequest(format!(
                "phone_number '{phone_number}' is not a dialable number"
            )));
        }

        let products = parse_products(&self.product_details);
        if products.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "product_details must name at least one product".into(),
            ));
        }

        Ok(CallJob {
            call_id,
            room,
            phone_number,
            customer_name: self
                .cust_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Customer".to_string()),
            language: self
                .language
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| default_language.to_string()),
            profile: CustomerProfile(self.cust_details),
            products,
            created_at: OffsetDateTime::now_utc(),
        })
    }
}

fn is_dialable(number: &str) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    digits.len() >= 7 && digits.chars().all(|c| c.is_ascii_digit())
}

/// Product fields arrive flattened as `name1`, `category1`, `riskLevel1`, `description1`, ...
/// A single-product request may drop the numeric suffix.
fn parse_products(details: &Map<String, Value>) -> Vec<ProductCandidate> {
    let field = |key: &str, idx: usize| -> Option<String> {
        let numbered = details.get(&format!("{key}{idx}"));
        let bare = if idx == 1 { details.get(key) } else { None };
        numbered
            .or(bare)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut products = Vec::new();
    for idx in 1..=PitchTier::MAX.number() {
        let Some(name) = field("name", idx) else {
            // Ranked list; a gap ends it.
            break;
        };
        let not_available = || "Not available".to_string();
        products.push(ProductCandidate {
            name,
            category: field("category", idx).unwrap_or_else(not_available),
            risk_level: field("riskLevel", idx).unwrap_or_else(not_available),
            description: field("description", idx).unwrap_or_else(not_available),
        });
    }
    products
}

/// Acknowledgment returned by `POST /create-dispatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAck {
    pub message: String,
    pub dispatch_id: String,
    pub room: String,
    pub dispatch_count: usize,
}

pub struct AppState {
    pub coordinator: Arc<CallCoordinator>,
    pub dispatches: DispatchRegistry,
    pub store: Arc<dyn CallStore>,
    pub default_language: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> DispatchRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn dispatch_request_builds_ranked_products() {
        let req = request(json!({
            "phone_number": "+919547234545",
            "cust_name": "Asha",
            "language": "hi-IN",
            "cust_details": {"customerId": 15634602, "activeMember": 1},
            "product_details": {
                "name1": "Gold Saver", "category1": "Deposit", "riskLevel1": "Low",
                "description1": "Fixed deposit",
                "name2": "Growth Fund", "riskLevel2": "Medium",
                "name3": "Equity Plus"
            }
        }));
        let job = req.into_job("bn-IN", "d1".into(), "call-d1".into()).unwrap();
        assert_eq!(job.language, "hi-IN");
        assert_eq!(job.products.len(), 3);
        assert_eq!(job.products[1].risk_level, "Medium");
        assert_eq!(job.products[2].category, "Not available");
        assert_eq!(job.profile.customer_id().as_deref(), Some("15634602"));
        assert!(job.profile.flag("activeMember"));
    }

    #[test]
    fn dispatch_request_accepts_unsuffixed_single_product() {
        let req = request(json!({
            "phone_number": "+15418349832",
            "product_details": {"name": "Travel Card"}
        }));
        let job = req.into_job("bn-IN", "d2".into(), "call-d2".into()).unwrap();
        assert_eq!(job.customer_name, "Customer");
        assert_eq!(job.language, "bn-IN");
        assert_eq!(job.primary_product_name(), Some("Travel Card"));
    }

    #[test]
    fn dispatch_request_rejects_missing_phone_or_products() {
        let no_phone = request(json!({"product_details": {"name1": "X"}}));
        assert!(matches!(
            no_phone.into_job("bn-IN", "d".into(), "r".into()),
            Err(DispatchError::InvalidRequest(_))
        ));

        let bad_phone = request(json!({"phone_number": "call me", "product_details": {"name1": "X"}}));
        assert!(bad_phone.into_job("bn-IN", "d".into(), "r".into()).is_err());

        let no_products = request(json!({"phone_number": "+15418349832"}));
        assert!(no_products.into_job("bn-IN", "d".into(), "r".into()).is_err());
    }

    #[test]
    fn product_list_stops_at_first_gap() {
        let mut details = Map::new();
        details.insert("name1".into(), json!("A"));
        details.insert("name3".into(), json!("C"));
        let products = parse_products(&details);
        assert_eq!(products.len(), 1);
    }
}
