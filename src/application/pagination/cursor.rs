//! Opaque, versioned keyset cursors.
//!
//! A cursor is URL-safe base64 (no padding) over a JSON payload carrying a
//! version tag `v`. Decoding reads the version first and dispatches on it,
//! so older tokens keep decoding after the payload evolves.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::listing_params;
use crate::domain::articles::{
    Article, ArticleFilter, Keyset, SortDirection, SortField, SortSpec, SortValue,
};

pub const CURSOR_VERSION: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64: {0}")]
    Encoding(String),
    #[error("cursor payload is malformed: {0}")]
    Malformed(String),
    #[error("unsupported cursor version {0}")]
    UnsupportedVersion(u32),
    #[error("cursor was issued for a different filter or sort")]
    Mismatch,
}

#[derive(Debug, Deserialize)]
struct VersionHeader {
    v: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayloadV1 {
    v: u32,
    sort_field: SortField,
    sort_value: SortValue,
    tiebreak_id: Uuid,
    dir: SortDirection,
    filter_fingerprint: String,
}

/// Position in a listing plus the identity of the listing it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    sort: SortSpec,
    position: Keyset,
    fingerprint: String,
}

impl Cursor {
    pub fn new(sort: SortSpec, position: Keyset, fingerprint: impl Into<String>) -> Self {
        Self {
            sort,
            position,
            fingerprint: fingerprint.into(),
        }
    }

    pub fn for_article(article: &Article, sort: SortSpec, fingerprint: &str) -> Self {
        Self::new(sort, article.keyset(sort.field), fingerprint)
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn position(&self) -> &Keyset {
        &self.position
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn encode(&self) -> String {
        let payload = CursorPayloadV1 {
            v: CURSOR_VERSION,
            sort_field: self.sort.field,
            sort_value: self.position.value.clone(),
            tiebreak_id: self.position.id,
            dir: self.sort.direction,
            filter_fingerprint: self.fingerprint.clone(),
        };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|err| CursorError::Encoding(err.to_string()))?;
        let header: VersionHeader = serde_json::from_slice(&bytes)
            .map_err(|err| CursorError::Malformed(err.to_string()))?;

        match header.v {
            1 => Self::from_v1(&bytes),
            other => Err(CursorError::UnsupportedVersion(other)),
        }
    }

    fn from_v1(bytes: &[u8]) -> Result<Self, CursorError> {
        let payload: CursorPayloadV1 =
            serde_json::from_slice(bytes).map_err(|err| CursorError::Malformed(err.to_string()))?;
        if !payload.sort_value.fits(payload.sort_field) {
            return Err(CursorError::Malformed(format!(
                "sort value does not match field `{}`",
                payload.sort_field
            )));
        }
        Ok(Self {
            sort: SortSpec::new(payload.sort_field, payload.dir),
            position: Keyset {
                value: payload.sort_value,
                id: payload.tiebreak_id,
            },
            fingerprint: payload.filter_fingerprint,
        })
    }

    /// Rejects a cursor minted for another filter or sort.
    pub fn ensure_matches(&self, fingerprint: &str, sort: SortSpec) -> Result<(), CursorError> {
        if self.fingerprint == fingerprint && self.sort == sort {
            Ok(())
        } else {
            Err(CursorError::Mismatch)
        }
    }
}

/// Digest of the canonical filter and sort. Page size is excluded so a
/// client may change it between pages.
pub fn filter_fingerprint(filter: &ArticleFilter, sort: SortSpec) -> String {
    listing_params(filter, sort).digest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample() -> Cursor {
        Cursor::new(
            SortSpec::default(),
            Keyset {
                value: SortValue::Time(datetime!(2024-05-01 08:30:00.123456 UTC)),
                id: Uuid::nil(),
            },
            "abc",
        )
    }

    #[test]
    fn encoded_cursor_is_url_safe_and_decodes() {
        let cursor = sample();
        let token = cursor.encode();
        assert!(!token.contains(['+', '/', '=']));
        assert_eq!(Cursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let token = URL_SAFE_NO_PAD.encode(br#"{"v":9,"anything":true}"#);
        assert_eq!(
            Cursor::decode(&token),
            Err(CursorError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            Cursor::decode("%%%"),
            Err(CursorError::Encoding(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            Cursor::decode(&not_json),
            Err(CursorError::Malformed(_))
        ));
    }

    #[test]
    fn value_must_fit_sort_field() {
        let token = URL_SAFE_NO_PAD.encode(
            br#"{"v":1,"sort_field":"title","sort_value":{"kind":"time","value":"2024-01-01T00:00:00Z"},"tiebreak_id":"00000000-0000-0000-0000-000000000000","dir":"asc","filter_fingerprint":"x"}"#,
        );
        assert!(matches!(
            Cursor::decode(&token),
            Err(CursorError::Malformed(_))
        ));
    }

    #[test]
    fn fingerprint_ignores_tag_order_but_not_sort() {
        let a = ArticleFilter {
            tags: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let b = ArticleFilter {
            tags: vec!["b".into(), "a".into()],
            ..Default::default()
        }
        .normalized();
        let sort = SortSpec::default();
        assert_eq!(filter_fingerprint(&a, sort), filter_fingerprint(&b, sort));
        assert_ne!(
            filter_fingerprint(&a, sort),
            filter_fingerprint(&a, sort.reversed())
        );

        let cursor = Cursor::new(sort, sample().position().clone(), filter_fingerprint(&a, sort));
        assert!(cursor.ensure_matches(&filter_fingerprint(&b, sort), sort).is_ok());
        assert_eq!(
            cursor.ensure_matches(&filter_fingerprint(&a, sort), sort.reversed()),
            Err(CursorError::Mismatch)
        );
    }
}
