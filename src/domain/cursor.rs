use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

// ============================================================================
// Keyset Pagination Cursor
// ============================================================================
//
// Opaque encoding of the (created_at, id) tuple of the last item of a page.
// Wire format: base64("{rfc3339-micros}|{uuid}"). Microsecond precision
// matches Postgres timestamptz, so encode/decode round-trips exactly.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid cursor")]
pub struct CursorDecodeError;

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.id
        );
        BASE64.encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self, CursorDecodeError> {
        let raw = BASE64.decode(token).map_err(|_| CursorDecodeError)?;
        let raw = String::from_utf8(raw).map_err(|_| CursorDecodeError)?;
        let (ts, id) = raw.split_once('|').ok_or(CursorDecodeError)?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| CursorDecodeError)?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| CursorDecodeError)?;
        Ok(Self { created_at, id })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_round_trips_exactly() {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 45).unwrap()
            + chrono::Duration::microseconds(123_456);
        let cursor = Cursor::new(created_at, Uuid::new_v4());

        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(Cursor::decode("not base64 !!!").is_err());
    }

    #[test]
    fn test_decode_rejects_missing_separator() {
        let token = BASE64.encode("2024-03-09T12:30:45.000000Z");
        assert!(Cursor::decode(&token).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_timestamp() {
        let token = BASE64.encode(format!("yesterday|{}", Uuid::new_v4()));
        assert!(Cursor::decode(&token).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_uuid() {
        let token = BASE64.encode("2024-03-09T12:30:45.000000Z|not-a-uuid");
        assert!(Cursor::decode(&token).is_err());
    }
}
