//! Annotation and finalizer key conventions.
//!
//! Pure string functions and constants defining the canonical keys the
//! engine reads and writes on a manifest's metadata.

use serde_json::Value;

use crate::error::CoreError;

/// Value is a subset of the letters `CUD`; absent means full permissions.
pub const ACCESS_PERMISSIONS: &str = "steward.io/access-permissions";

/// Serialized copy of the last successfully applied spec, used for drift
/// diffing when a verify reports ready.
pub const LAST_APPLIED_SPEC: &str = "steward.io/last-applied-spec";

/// The engine's finalizer; holds the manifest until external cleanup
/// completes.
pub const CLEANUP_FINALIZER: &str = "steward.io/cleanup";

/// Serialize a spec for the last-applied annotation value.
pub fn encode_last_applied(spec: &Value) -> Result<String, CoreError> {
    Ok(serde_json::to_string(spec)?)
}

/// Parse a last-applied annotation value back into a spec.
pub fn decode_last_applied(raw: &str) -> Result<Value, CoreError> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A spec survives the annotation round trip unchanged.
    #[test]
    fn last_applied_round_trip() {
        let spec = json!({"size": 3, "tier": "standard"});
        let encoded = encode_last_applied(&spec).unwrap();
        assert_eq!(decode_last_applied(&encoded).unwrap(), spec);
    }

    /// A corrupted annotation value surfaces as a serialization error.
    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_last_applied("{not json").is_err());
    }
}
