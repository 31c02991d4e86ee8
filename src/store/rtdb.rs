/// Realtime Database REST client
///
/// Reads and writes JSON nodes over the database's REST surface:
///   GET  {base_url}/{path}.json?auth={token}   → node or `null`
///   PUT  {base_url}/{path}.json?auth={token}   ← node (JSON `null` deletes)
///
/// REST docs: https://firebase.google.com/docs/reference/rest/database

use super::{StoreError, TreeStore};
use serde_json::Value;
use std::time::Duration;

pub struct RtdbStore {
    client: reqwest::blocking::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RtdbStore {
    /// Builds a client whose every request carries `timeout`.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<RtdbStore, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(RtdbStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    /// REST URL of the node at `path`.
    pub fn node_url(&self, path: &str) -> String {
        build_node_url(&self.base_url, path, self.auth_token.as_deref())
    }
}

/// Builds `{base}/{path}.json[?auth=token]`.
pub fn build_node_url(base_url: &str, path: &str, auth_token: Option<&str>) -> String {
    let path = path.trim_matches('/');
    let mut url = format!("{}/{}.json", base_url.trim_end_matches('/'), path);
    if let Some(token) = auth_token {
        url.push_str("?auth=");
        url.push_str(token);
    }
    url
}

fn map_transport(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

impl TreeStore for RtdbStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .client
            .get(self.node_url(path))
            .header("Accept", "application/json")
            .send()
            .map_err(map_transport)?;

        if !response.status().is_success() {
            return Err(StoreError::HttpError(response.status().as_u16()));
        }

        let body: Value = response.json().map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout
            } else {
                StoreError::ParseError(e.to_string())
            }
        })?;

        match body {
            Value::Null => Ok(None),
            other => Ok(Some(other)),
        }
    }

    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let request = if value.is_null() {
            self.client.delete(self.node_url(path))
        } else {
            self.client.put(self.node_url(path)).json(&value)
        };

        let response = request.send().map_err(map_transport)?;

        if !response.status().is_success() {
            return Err(StoreError::HttpError(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_url_without_auth() {
        let url = build_node_url(
            "https://floody.asia-southeast1.firebasedatabase.app/",
            "/Polder/pump_on/2025-01-01-00_00_00",
            None,
        );
        assert_eq!(
            url,
            "https://floody.asia-southeast1.firebasedatabase.app/Polder/pump_on/2025-01-01-00_00_00.json"
        );
    }

    #[test]
    fn test_node_url_with_auth_token() {
        let url = build_node_url("https://db.example", "Polder", Some("s3cret"));
        assert_eq!(url, "https://db.example/Polder.json?auth=s3cret");
    }

    #[test]
    fn test_client_construction_trims_base_url() {
        let store = RtdbStore::new("https://db.example///", None, Duration::from_secs(5))
            .expect("client should build");
        assert_eq!(store.node_url("a/b"), "https://db.example/a/b.json");
    }
}
