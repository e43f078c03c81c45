//! Shared utilities for rbc.

use serde::Serialize;

/// Stable BLAKE3 digest (hex) over the canonical JSON form of `value`.
///
/// The value is first converted to a `serde_json::Value`, whose object maps
/// keep keys sorted, so field order in the input never changes the digest.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Redact a secret for logging, keeping only a short prefix.
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "***".to_string()
    } else {
        format!("{visible}***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a = json!({"version": "1.0.0", "config": {"minify": true, "target": "es2020"}});
        let b = json!({"config": {"target": "es2020", "minify": true}, "version": "1.0.0"});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_content_hash_differs_on_value() {
        let a = json!({"version": "1.0.0"});
        let b = json!({"version": "1.0.1"});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_content_hash_is_hex() {
        let hash = content_hash(&json!({})).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("rbc_live_abcdef123"), "rbc_***");
    }
}
