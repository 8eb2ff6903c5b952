/*!
 * Serde utilities for payload fields that need a non-default wire shape.
 *
 * Rendered images travel as base64 text inside JSON replies instead of as
 * arrays of numbers.
 */

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize raw bytes as a standard base64 string.
///
/// # Usage with serde
///
/// ```rust
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Plot {
///     #[serde(with = "analysis_server::utils::serde::base64_bytes")]
///     image: Vec<u8>,
/// }
/// ```
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| D::Error::custom(format!("invalid base64 payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Plot {
        #[serde(with = "super::base64_bytes")]
        image: Vec<u8>,
    }

    #[test]
    fn test_bytes_serialize_as_base64_text() {
        let plot = Plot {
            image: vec![0x89, b'P', b'N', b'G'],
        };
        let json = serde_json::to_string(&plot).unwrap();
        assert_eq!(json, r#"{"image":"iVBORw=="}"#);
        assert_eq!(serde_json::from_str::<Plot>(&json).unwrap(), plot);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let result = serde_json::from_str::<Plot>(r#"{"image":"not base64!"}"#);
        assert!(result.is_err());
    }
}
