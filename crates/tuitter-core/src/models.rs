//! Backend payloads decoded by the typed calls on `SessionClient`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    pub handle: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    #[serde(default)]
    pub posts_count: u64,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.handle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "username", alias = "user")]
    pub author: String,
    #[serde(default, alias = "text")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default, alias = "liked")]
    pub liked_by_user: bool,
    #[serde(default, alias = "reposted")]
    pub reposted_by_user: bool,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// RFC 3339 timestamps keep their offset; naive ones are taken as UTC.
/// Anything unparseable becomes `None` rather than failing the whole post.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPost<'a> {
    pub content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_post_accepts_backend_aliases() {
        let post: Post = serde_json::from_str(
            r#"{"id": 42, "username": "alice", "text": "hello", "likes": 3, "liked": true}"#,
        )
        .unwrap();
        assert_eq!(post.id, "42");
        assert_eq!(post.author, "alice");
        assert_eq!(post.content, "hello");
        assert_eq!(post.likes, 3);
        assert!(post.liked_by_user);
        assert!(post.timestamp.is_none());
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        let post: Post =
            serde_json::from_str(r#"{"id": "p1", "timestamp": "2025-03-01T12:30:00"}"#).unwrap();
        assert_eq!(
            post.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_offset_timestamp_is_converted() {
        let post: Post =
            serde_json::from_str(r#"{"id": "p1", "timestamp": "2025-03-01T12:30:00+02:00"}"#)
                .unwrap();
        assert_eq!(
            post.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_bad_timestamp_does_not_fail_post() {
        let post: Post =
            serde_json::from_str(r#"{"id": "p1", "timestamp": "yesterday"}"#).unwrap();
        assert!(post.timestamp.is_none());
    }

    #[test]
    fn test_user_display_name_falls_back_to_handle() {
        let user: User = serde_json::from_str(r#"{"handle": "alice", "display_name": ""}"#).unwrap();
        assert_eq!(user.display_name(), "alice");
    }
}
