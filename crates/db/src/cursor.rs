//! Opaque pagination cursors for message listing.
//!
//! A cursor encodes the `(created_at, id)` position of the last message a
//! page returned. Clients treat it as an opaque token; the encoding is
//! base64 over `"<timestamp_micros>:<message_id>"`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::TimeZone;
use huddle_common::{AppError, AppResult};
use sea_orm::prelude::DateTimeWithTimeZone;

/// A position in the `(created_at, id)` total order of a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageCursor {
    /// Creation timestamp of the last-seen message.
    pub created_at: DateTimeWithTimeZone,
    /// ID of the last-seen message, the tie-break for equal timestamps.
    pub id: String,
}

impl MessageCursor {
    /// Build a cursor pointing at the given message position.
    #[must_use]
    pub const fn new(created_at: DateTimeWithTimeZone, id: String) -> Self {
        Self { created_at, id }
    }

    /// Encode into an opaque token.
    #[must_use]
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.created_at.timestamp_micros(), self.id);
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode an opaque token back into a cursor position.
    ///
    /// Malformed tokens map to a validation error so they surface as a 400
    /// rather than a server fault.
    pub fn decode(token: &str) -> AppResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| AppError::BadRequest("Invalid pagination cursor".to_string()))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| AppError::BadRequest("Invalid pagination cursor".to_string()))?;

        let (micros, id) = raw
            .split_once(':')
            .ok_or_else(|| AppError::BadRequest("Invalid pagination cursor".to_string()))?;

        let micros: i64 = micros
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid pagination cursor".to_string()))?;

        if id.is_empty() {
            return Err(AppError::BadRequest(
                "Invalid pagination cursor".to_string(),
            ));
        }

        let created_at = chrono::Utc
            .timestamp_micros(micros)
            .single()
            .ok_or_else(|| AppError::BadRequest("Invalid pagination cursor".to_string()))?
            .fixed_offset();

        Ok(Self {
            created_at,
            id: id.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = MessageCursor::new(
            Utc::now().fixed_offset(),
            "01h2xcejqtf2nbrexx3vqjhp41".to_string(),
        );

        let decoded = MessageCursor::decode(&cursor.encode()).unwrap();

        // Sub-microsecond precision is dropped by the encoding.
        assert_eq!(
            decoded.created_at.timestamp_micros(),
            cursor.created_at.timestamp_micros()
        );
        assert_eq!(decoded.id, cursor.id);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(MessageCursor::decode("not base64 at all!!").is_err());
    }

    #[test]
    fn test_decode_rejects_missing_separator() {
        use base64::Engine;
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("1234567890");
        assert!(MessageCursor::decode(&token).is_err());
    }

    #[test]
    fn test_decode_rejects_non_numeric_timestamp() {
        use base64::Engine;
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("abc:msg1");
        assert!(MessageCursor::decode(&token).is_err());
    }

    #[test]
    fn test_decode_rejects_empty_id() {
        use base64::Engine;
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("123456:");
        assert!(MessageCursor::decode(&token).is_err());
    }
}
