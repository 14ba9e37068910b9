use reqwest::Method;
use serde::Serialize;

use super::ApiError;

/// One logical call against the backend.
///
/// `retry_eligible` is true on the first attempt and false on the single
/// retry the executor may issue after restoring the session.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub retry_eligible: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retry_eligible: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("unserializable body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    /// The copy sent after a successful restore.
    pub(crate) fn as_retry(&self) -> Self {
        Self {
            retry_eligible: false,
            ..self.clone()
        }
    }

    /// Query parameters with `handle` added unless the caller set one,
    /// e.g. to read another user's posts.
    pub(crate) fn query_with_handle(&self, handle: &str) -> Vec<(String, String)> {
        let mut query = self.query.clone();
        if !query.iter().any(|(k, _)| k == "handle") {
            query.push(("handle".to_string(), handle.to_string()));
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_added_once() {
        let req = ApiRequest::get("/timeline").query("limit", 50);
        let query = req.query_with_handle("alice");
        assert_eq!(
            query,
            vec![
                ("limit".to_string(), "50".to_string()),
                ("handle".to_string(), "alice".to_string())
            ]
        );
    }

    #[test]
    fn test_explicit_handle_wins() {
        let req = ApiRequest::get("/posts").query("handle", "bob");
        let query = req.query_with_handle("alice");
        assert_eq!(query, vec![("handle".to_string(), "bob".to_string())]);
    }

    #[test]
    fn test_retry_copy_is_identical_but_ineligible() {
        let req = ApiRequest::post("/posts")
            .json(&serde_json::json!({"content": "hi"}))
            .unwrap();
        assert!(req.retry_eligible);
        let retry = req.as_retry();
        assert!(!retry.retry_eligible);
        assert_eq!(retry.method, req.method);
        assert_eq!(retry.path, req.path);
        assert_eq!(retry.body, req.body);
    }
}
