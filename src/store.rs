//! Remote store client for the GitHub Contents API.
//! One file per operation: GET returns the base64 content plus its blob sha,
//! PUT replaces the whole file in a single commit. The sha doubles as the
//! optimistic-concurrency token: sending it with a write makes the backend
//! reject the commit when the remote content moved underneath us.
//! Requires a personal access token with `contents: write` on the target repo.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::{Result, SyncError};

const API_BASE: &str = "https://api.github.com";
const RAW_BASE: &str = "https://raw.githubusercontent.com";
const API_VERSION: &str = "2022-11-28"; // X-GitHub-Api-Version pin
const ACCEPT: &str = "application/vnd.github+json";
const TIMEOUT_SECS: u64 = 30;

// *************** Addressing ***************

/// Identity of one remote file: repository (`owner/repo`), path, branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLocation {
    pub repo: String,
    pub path: String,
    pub branch: String,
}

impl FileLocation {
    pub fn new(repo: impl Into<String>, path: impl Into<String>, branch: impl Into<String>) -> Self {
        FileLocation {
            repo: repo.into(),
            path: path.into(),
            branch: branch.into(),
        }
    }
}

/// A decoded remote file: its JSON value and the sha observed with it.
#[derive(Clone, Debug)]
pub struct RemoteFile {
    pub value: Value,
    pub sha: String,
}

/// Builds the unauthenticated raw-content URL for a file. Pure string
/// template for display/clipboard use; performs no I/O.
pub fn public_file_url(repo: &str, branch: &str, path: &str) -> String {
    format!("{}/{}/{}/{}", RAW_BASE, repo, branch, path)
}

// *************** Store trait ***************

/// Read/write access to single files in a remote content store.
///
/// `write_file` with `expected_sha: None` is an unconditional create; with
/// `Some(sha)` the backend must reject the write with `Conflict` when the
/// file's current sha differs. Returns the new sha on success.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn read_file(&self, loc: &FileLocation) -> Result<RemoteFile>;

    async fn write_file(
        &self,
        loc: &FileLocation,
        message: &str,
        value: &Value,
        expected_sha: Option<&str>,
    ) -> Result<String>;
}

// *************** Wire types ***************

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
    sha: String,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct WriteResponse {
    content: WrittenBlob,
}

#[derive(Deserialize)]
struct WrittenBlob {
    sha: String,
}

// *************** GitHub implementation ***************

pub struct GithubStore {
    client: Client,
    token: String,
}

impl GithubStore {
    /// Creates a store client around the given credential. The credential is
    /// held verbatim and only ever copied into the Authorization header.
    pub fn new(token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(concat!("confsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(GithubStore { client, token })
    }

    fn contents_url(&self, loc: &FileLocation) -> String {
        format!("{}/repos/{}/contents/{}", API_BASE, loc.repo, loc.path)
    }
}

#[async_trait]
impl RemoteStore for GithubStore {
    async fn read_file(&self, loc: &FileLocation) -> Result<RemoteFile> {
        let url = self.contents_url(loc);
        let start = Instant::now();

        let response = self
            .client
            .get(&url)
            .query(&[("ref", loc.branch.as_str())])
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(%url, %status, elapsed = ?start.elapsed(), "contents read");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_read_failure(status.as_u16(), body, &loc.path));
        }

        let parsed: ContentResponse = serde_json::from_str(&response.text().await?)?;
        let text = codec::decode(&parsed.content)?;
        let value: Value = serde_json::from_str(&text)?;

        Ok(RemoteFile {
            value,
            sha: parsed.sha,
        })
    }

    async fn write_file(
        &self,
        loc: &FileLocation,
        message: &str,
        value: &Value,
        expected_sha: Option<&str>,
    ) -> Result<String> {
        let url = self.contents_url(loc);
        let text = serde_json::to_string_pretty(value)?;
        let request = WriteRequest {
            message,
            content: codec::encode(&text),
            branch: &loc.branch,
            sha: expected_sha,
        };

        let start = Instant::now();
        let response = self
            .client
            .put(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(%url, %status, elapsed = ?start.elapsed(), "contents write");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_write_failure(status.as_u16(), body, &loc.path));
        }

        let parsed: WriteResponse = serde_json::from_str(&response.text().await?)?;
        Ok(parsed.content.sha)
    }
}

// *************** Status classification ***************

fn classify_read_failure(status: u16, body: String, path: &str) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth,
        404 => SyncError::NotFound {
            path: path.to_string(),
        },
        status => SyncError::Remote { status, body },
    }
}

/// 409 is the sha-mismatch rejection; 422 is what an unconditional create
/// gets when the file already exists. Both are conflicts to the protocol.
fn classify_write_failure(status: u16, body: String, path: &str) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth,
        404 => SyncError::NotFound {
            path: path.to_string(),
        },
        409 | 422 => SyncError::Conflict {
            path: path.to_string(),
        },
        status => SyncError::Remote { status, body },
    }
}

// *************** Test double ***************


// *************** Tests ***************

#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_file_url() {
        assert_eq!(
            public_file_url("o/r", "main", "configs/qq.json"),
            "https://raw.githubusercontent.com/o/r/main/configs/qq.json"
        );
    }

    #[test]
    fn test_read_failure_classification() {
        assert!(matches!(
            classify_read_failure(401, String::new(), "a.json"),
            SyncError::Auth
        ));
        assert!(matches!(
            classify_read_failure(403, String::new(), "a.json"),
            SyncError::Auth
        ));
        assert!(matches!(
            classify_read_failure(404, String::new(), "a.json"),
            SyncError::NotFound { .. }
        ));
        match classify_read_failure(500, "boom".to_string(), "a.json") {
            SyncError::Remote { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Remote, got {:?}", other),
        }
    }

    #[test]
    fn test_write_failure_classification() {
        assert!(matches!(
            classify_write_failure(409, String::new(), "a.json"),
            SyncError::Conflict { .. }
        ));
        assert!(matches!(
            classify_write_failure(422, String::new(), "a.json"),
            SyncError::Conflict { .. }
        ));
        assert!(matches!(
            classify_write_failure(404, String::new(), "a.json"),
            SyncError::NotFound { .. }
        ));
    }

    #[test]
    fn test_content_response_decodes_wrapped_payload() {
        // The API wraps base64 content with newlines; shape as returned by GET
        let raw = format!(
            r#"{{"content":"{}","sha":"abc123","encoding":"base64"}}"#,
            "eyJ0aXRs\\nZSI6IkhpIn0="
        );
        let parsed: ContentResponse = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.sha, "abc123");
        let text = crate::codec::decode(&parsed.content).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"title": "Hi"}));
    }

    #[test]
    fn test_write_request_omits_sha_on_create() {
        let request = WriteRequest {
            message: "create",
            content: "AAAA".to_string(),
            branch: "main",
            sha: None,
        };
        let body = serde_json::to_string(&request).unwrap();
        assert!(!body.contains("\"sha\""));

        let request = WriteRequest {
            sha: Some("abc123"),
            ..request
        };
        let body = serde_json::to_string(&request).unwrap();
        assert!(body.contains("\"sha\":\"abc123\""));
    }

    #[tokio::test]
    async fn test_memory_store_conflict_semantics() {
        let store = MemoryStore::new();
        let loc = FileLocation::new("o/r", "a.json", "main");

        // Missing file reads NotFound
        assert!(matches!(
            store.read_file(&loc).await,
            Err(SyncError::NotFound { .. })
        ));

        let sha = store
            .write_file(&loc, "create", &json!({"n": 1}), None)
            .await
            .unwrap();

        // Unconditional create against the now-existing file conflicts
        assert!(matches!(
            store.write_file(&loc, "again", &json!({"n": 2}), None).await,
            Err(SyncError::Conflict { .. })
        ));

        // A stale sha conflicts, the observed sha succeeds
        assert!(matches!(
            store
                .write_file(&loc, "stale", &json!({"n": 2}), Some("sha-0"))
                .await,
            Err(SyncError::Conflict { .. })
        ));
        let new_sha = store
            .write_file(&loc, "update", &json!({"n": 2}), Some(&sha))
            .await
            .unwrap();
        assert_ne!(new_sha, sha);
    }

    #[tokio::test]
    #[ignore = "requires CONFSYNC_TOKEN and a reachable test repository"]
    async fn test_real_api_read() {
        // Run with: CONFSYNC_TOKEN=ghp_... cargo test test_real_api_read -- --ignored
        let token = std::env::var("CONFSYNC_TOKEN").unwrap();
        let store = GithubStore::new(token).unwrap();
        let loc = FileLocation::new("octocat/Hello-World", "README", "master");
        let result = store.read_file(&loc).await;
        println!("Result: {:?}", result.as_ref().map(|f| &f.sha));
    }
}
