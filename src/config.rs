//! Marshalling configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarshalConfig {
    /// Reject `bool` slots holding anything other than 0 or 1.
    pub strict_booleans: bool,
    /// Upper bound on cached decoders; `None` caches every resolved type.
    pub max_cached_types: Option<usize>,
}

impl MarshalConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
