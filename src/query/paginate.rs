//! Cursor-based offset paginator. Cursors are opaque to clients: a base64
//! JSON body plus a truncated SHA-256 MAC keyed by the server secret, so a
//! tampered or foreign cursor is rejected rather than misinterpreted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

pub const DEFAULT_PER_PAGE: i64 = 100;
pub const MAX_PER_PAGE: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub per_page: i64,
    pub offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_group_key: Option<String>,
}

impl Cursor {
    pub fn first_page(per_page: i64) -> Self {
        Cursor {
            per_page: clamp_per_page(per_page),
            offset: 0,
            group_key: None,
            sub_group_key: None,
        }
    }

    pub fn for_group(per_page: i64, group_key: String, sub_group_key: Option<String>) -> Self {
        Cursor {
            per_page: clamp_per_page(per_page),
            offset: 0,
            group_key: Some(group_key),
            sub_group_key,
        }
    }

    pub fn next(&self) -> Self {
        Cursor {
            offset: self.offset + self.per_page,
            ..self.clone()
        }
    }

    pub fn prev(&self) -> Self {
        Cursor {
            offset: (self.offset - self.per_page).max(0),
            ..self.clone()
        }
    }

    pub fn encode(&self, secret: &str) -> String {
        let body = serde_json::to_vec(self).expect("cursor serializes");
        let encoded = URL_SAFE_NO_PAD.encode(&body);
        let mac = sign(&encoded, secret);
        format!("{encoded}.{mac}")
    }

    pub fn decode(token: &str, secret: &str) -> AppResult<Self> {
        let (encoded, mac) = token
            .rsplit_once('.')
            .ok_or_else(|| AppError::invalid_filter("malformed cursor"))?;
        if sign(encoded, secret) != mac {
            return Err(AppError::invalid_filter("cursor failed verification"));
        }
        let body = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AppError::invalid_filter("malformed cursor"))?;
        let mut cursor: Cursor = serde_json::from_slice(&body)
            .map_err(|_| AppError::invalid_filter("malformed cursor"))?;
        cursor.per_page = clamp_per_page(cursor.per_page);
        cursor.offset = cursor.offset.max(0);
        Ok(cursor)
    }
}

fn clamp_per_page(requested: i64) -> i64 {
    if requested <= 0 {
        DEFAULT_PER_PAGE
    } else {
        requested.min(MAX_PER_PAGE)
    }
}

fn sign(encoded: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(encoded.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// One page cut out of an already-ordered slice.
#[derive(Debug)]
pub struct PageSlice<'a, T> {
    pub rows: &'a [T],
    pub total_count: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

pub fn slice_page<'a, T>(rows: &'a [T], cursor: &Cursor) -> PageSlice<'a, T> {
    let total = rows.len() as i64;
    let start = cursor.offset.min(total) as usize;
    let end = (cursor.offset + cursor.per_page).min(total) as usize;
    PageSlice {
        rows: &rows[start..end],
        total_count: total,
        has_next: (end as i64) < total,
        has_prev: cursor.offset > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SECRET: &str = "test-secret";

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor::for_group(50, "started".into(), Some("urgent".into()));
        let token = cursor.encode(SECRET);
        assert_eq!(Cursor::decode(&token, SECRET).unwrap(), cursor);
    }

    #[test]
    fn tampered_cursor_is_rejected() {
        let token = Cursor::first_page(100).encode(SECRET);
        let mut tampered = token.clone();
        tampered.replace_range(0..2, "zz");
        assert_eq!(
            Cursor::decode(&tampered, SECRET).unwrap_err().kind(),
            ErrorKind::InvalidFilter
        );
    }

    #[test]
    fn cursor_from_another_secret_is_rejected() {
        let token = Cursor::first_page(100).encode("other-secret");
        assert!(Cursor::decode(&token, SECRET).is_err());
    }

    #[test]
    fn per_page_is_clamped() {
        assert_eq!(Cursor::first_page(0).per_page, DEFAULT_PER_PAGE);
        assert_eq!(Cursor::first_page(50_000).per_page, MAX_PER_PAGE);
    }

    #[test]
    fn slicing_reports_neighbours() {
        let rows: Vec<i32> = (0..25).collect();
        let cursor = Cursor {
            per_page: 10,
            offset: 10,
            group_key: None,
            sub_group_key: None,
        };
        let page = slice_page(&rows, &cursor);
        assert_eq!(page.rows, &rows[10..20]);
        assert_eq!(page.total_count, 25);
        assert!(page.has_next);
        assert!(page.has_prev);

        let last = slice_page(&rows, &cursor.next());
        assert_eq!(last.rows.len(), 5);
        assert!(!last.has_next);
    }

    #[test]
    fn offset_beyond_end_yields_empty_page() {
        let rows: Vec<i32> = (0..3).collect();
        let cursor = Cursor {
            per_page: 10,
            offset: 100,
            group_key: None,
            sub_group_key: None,
        };
        let page = slice_page(&rows, &cursor);
        assert!(page.rows.is_empty());
        assert!(!page.has_next);
    }
}
