//! On-disk index entries mapping an action ID to its output

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current index entry format
pub const INDEX_VERSION: u32 = 1;

/// Index entry stored as `a-<actionID>` in the cache directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Format version
    #[serde(rename = "v")]
    pub version: u32,

    /// Hex output ID naming the payload file
    #[serde(rename = "o")]
    pub output_id: String,

    /// Payload size recorded at write time
    #[serde(rename = "n")]
    pub size: u64,

    /// Write time, nanoseconds since the Unix epoch
    #[serde(rename = "t")]
    pub time_nanos: i64,
}

impl IndexEntry {
    /// Create an entry stamped with the current time
    pub fn new(output_id: impl Into<String>, size: u64) -> Self {
        Self {
            version: INDEX_VERSION,
            output_id: output_id.into(),
            size,
            time_nanos: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_compact_field_names() {
        let entry = IndexEntry {
            version: 1,
            output_id: "bb".to_string(),
            size: 3,
            time_nanos: 42,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"v":1,"o":"bb","n":3,"t":42}"#);
    }

    #[test]
    fn negative_size_is_rejected() {
        let parsed = serde_json::from_str::<IndexEntry>(r#"{"v":1,"o":"bb","n":-3,"t":0}"#);
        assert!(parsed.is_err());
    }
}
