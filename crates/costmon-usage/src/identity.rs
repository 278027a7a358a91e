//! Deterministic natural keys for usage rows.
//!
//! A key is the first 32 hex characters of the SHA-256 of `|`-joined parts.
//! The first part names the key family so that keys from different sources
//! never collide.

use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const KEY_HEX_LEN: usize = 32;
const API_KEY_HASH_LEN: usize = 16;

/// Natural key of a [`crate::models::UsageRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    fn from_parts(parts: &[&str]) -> Self {
        let digest = Sha256::digest(parts.join("|").as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(KEY_HEX_LEN);
        Self(hex)
    }

    /// Session record carrying a provider message id.
    ///
    /// Streaming clients write the same message on several lines; they all
    /// share this key.
    pub fn session_message(app: &str, message_id: &str, request_id: Option<&str>) -> Self {
        match request_id {
            Some(request_id) => Self::from_parts(&[app, "msg", message_id, request_id]),
            None => Self::from_parts(&[app, "msg", message_id]),
        }
    }

    /// Session record without an id, keyed by its position.
    pub fn session_line(app: &str, path: &Path, line: usize) -> Self {
        let path = path.to_string_lossy();
        let line = line.to_string();
        Self::from_parts(&[app, "line", &path, &line])
    }

    /// Daily row from a provider usage API.
    pub fn api_row(provider: &str, date: NaiveDate, api_key_hash: &str, model: &str) -> Self {
        let date = date.to_string();
        Self::from_parts(&["api", provider, &date, api_key_hash, model])
    }

    /// Hand-entered usage.
    pub fn manual(date: NaiveDate, provider: &str, model: &str, label: &str) -> Self {
        let date = date.to_string();
        Self::from_parts(&["manual", &date, provider, model, label])
    }

    /// Wrap an already computed key (read back from storage).
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for IdentityKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for IdentityKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(Self)
    }
}

/// Fingerprint of an API key. The key itself is never stored.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(api_key.as_bytes()));
    hex.truncate(API_KEY_HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_keys_are_deterministic() {
        let a = IdentityKey::session_message("claude-code", "msg_01", Some("req_9"));
        let b = IdentityKey::session_message("claude-code", "msg_01", Some("req_9"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_families_do_not_collide() {
        let msg = IdentityKey::session_message("claude-code", "msg_01", None);
        let other_app = IdentityKey::session_message("openclaw", "msg_01", None);
        let line = IdentityKey::session_line("claude-code", Path::new("/logs/a.jsonl"), 1);
        let next_line = IdentityKey::session_line("claude-code", Path::new("/logs/a.jsonl"), 2);
        assert_ne!(msg, other_app);
        assert_ne!(msg, line);
        assert_ne!(line, next_line);
    }

    #[test]
    fn test_api_and_manual_keys() {
        let d = date("2026-03-01");
        let hash = hash_api_key("sk-test");
        assert_eq!(hash.len(), 16);

        let a = IdentityKey::api_row("openai", d, &hash, "gpt-4o");
        assert_eq!(a, IdentityKey::api_row("openai", d, &hash, "gpt-4o"));
        assert_ne!(a, IdentityKey::api_row("openai", date("2026-03-02"), &hash, "gpt-4o"));

        let m = IdentityKey::manual(d, "openai", "gpt-4o", "");
        assert_ne!(m, IdentityKey::manual(d, "openai", "gpt-4o", "batch job"));
    }

    #[test]
    fn test_api_key_hash_is_stable() {
        assert_eq!(hash_api_key("abc"), "ba7816bf8f01cfea");
    }
}
