// Serde helpers for fields the remote platform may send in more than one shape.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum IdFormat {
    Number(i64),
    String(String),
}

/// Deserializes a remote identifier from either a JSON number or a JSON string.
pub fn deserialize_remote_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<IdFormat>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(IdFormat::Number(n)) => Ok(Some(n.to_string())),
        Some(IdFormat::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.to_string()))
            }
        }
    }
}
