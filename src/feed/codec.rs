//! Item codec: the opaque byte payload stored in an item log.

use crate::feed::types::FeedItem;
use crate::{Result, VaultError};

/// Serialize an item for storage.
pub fn encode(item: &FeedItem) -> Result<Vec<u8>> {
    serde_json::to_vec(item).map_err(|e| VaultError::Codec(format!("encode failed: {e}")))
}

/// Deserialize a stored payload.
pub fn decode(payload: &[u8]) -> Result<FeedItem> {
    serde_json::from_slice(payload).map_err(|e| VaultError::Codec(format!("decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_encode_decode() {
        let published_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let item = FeedItem::new("Title with \"quotes\" and 日本語", published_at)
            .with_link("https://example.com/a?b=c")
            .with_description("line one\nline two");

        let payload = encode(&item).unwrap();
        assert_eq!(decode(&payload).unwrap(), item);
    }

    #[test]
    fn test_decode_tolerates_missing_optional_fields() {
        let payload = br#"{"title":"T","published_at":"2020-05-24T00:00:00Z"}"#;
        let item = decode(payload).unwrap();
        assert_eq!(item.title, "T");
        assert!(item.link.is_empty());
        assert!(item.description.is_empty());
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode(b"\x00\x01 not json").unwrap_err();
        assert!(matches!(err, VaultError::Codec(_)));
    }

    #[test]
    fn test_decode_requires_publish_time() {
        let err = decode(br#"{"title":"T"}"#).unwrap_err();
        assert!(err.to_string().contains("published_at"));
    }
}
