//! Rewrites inline image references into compact storage references before
//! they are written to the outbox.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_PROVIDER: &str = "s3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReference {
    pub provider: String,
    pub bucket: String,
    pub object_key: String,
    pub cache_key: String,
}

impl StorageReference {
    pub fn new(provider: &str, bucket: &str, object_key: &str, cache_key: Option<&str>) -> Self {
        let object_key = object_key.trim_start_matches('/');
        Self {
            provider: provider.to_string(),
            bucket: bucket.to_string(),
            object_key: object_key.to_string(),
            cache_key: cache_key
                .map(str::to_string)
                .unwrap_or_else(|| format!("{bucket}/{object_key}")),
        }
    }

    /// `s3://bucket/key/parts`; anything else is not a reference.
    pub fn parse_url(value: &str) -> Option<Self> {
        let rest = value.strip_prefix("s3://")?;
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(DEFAULT_PROVIDER, bucket, key, None))
    }

    /// `{"storage": {"provider"?, "bucket", "key" | "object_key", "cache_key"?}}`
    fn from_storage_field(object: &Map<String, Value>) -> Option<Self> {
        let storage = object.get("storage")?.as_object()?;
        let text = |name: &str| storage.get(name).and_then(Value::as_str);
        let bucket = text("bucket")?;
        let key = text("object_key").or_else(|| text("key"))?;
        Some(Self::new(
            text("provider").unwrap_or(DEFAULT_PROVIDER),
            bucket,
            key,
            text("cache_key"),
        ))
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "provider": self.provider,
            "bucket": self.bucket,
            "object_key": self.object_key,
            "cache_key": self.cache_key,
        })
    }
}

/// Walks the payload and replaces every recognised reference. `data:` URIs
/// are content that has not been uploaded yet and stay as they are.
pub fn normalize_payload(payload: Value) -> Value {
    match payload {
        Value::String(text) => match StorageReference::parse_url(&text) {
            Some(reference) => reference.to_value(),
            None => Value::String(text),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_payload).collect()),
        Value::Object(object) => match StorageReference::from_storage_field(&object) {
            Some(reference) => reference.to_value(),
            None => Value::Object(
                object
                    .into_iter()
                    .map(|(key, value)| (key, normalize_payload(value)))
                    .collect(),
            ),
        },
        other => other,
    }
}
