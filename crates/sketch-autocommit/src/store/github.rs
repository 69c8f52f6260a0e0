//! GitHub contents API store.
//!
//! The blob `sha` of a file is its revision token. GitHub refuses a `PUT`
//! whose `sha` is not the current one (409) and refuses a `PUT` without `sha`
//! when the file exists (422), which gives the compare-and-swap semantics
//! `SourceStore` requires.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CommitInfo, RevisionToken, SourceStore, StoredSource};
use crate::config::{RepositoryConfig, StoreConfig};
use crate::errors::StoreError;

const USER_AGENT: &str = concat!("sketch-autocommit/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
    #[serde(default)]
    commit: Option<PutCommit>,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutCommit {
    sha: String,
}

/// Decode a contents-API document body into text.
fn decode_contents(doc: ContentsResponse) -> Result<StoredSource, StoreError> {
    if doc.encoding != "base64" {
        return Err(StoreError::Decode(format!(
            "unsupported encoding {:?} (file too large for the contents API?)",
            doc.encoding
        )));
    }
    // GitHub wraps the base64 payload at 60 columns.
    let packed: String = doc.content.split_whitespace().collect();
    let bytes = STANDARD
        .decode(packed)
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    let content = String::from_utf8(bytes).map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(StoredSource {
        content,
        revision: RevisionToken::new(doc.sha),
    })
}

/// Which kind of write a status code answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Update,
    Create,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

/// Whether a 422 body is GitHub's answer to a create on an existing file.
fn reports_existing_file(body: &str) -> bool {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.to_string());
    message.contains("\"sha\" wasn't supplied")
}

fn write_error(kind: WriteKind, status: u16, body: String, path: &str, sha: Option<&str>) -> StoreError {
    match (kind, status) {
        (_, 401 | 403) => StoreError::Unauthorized(status),
        (WriteKind::Update, 409 | 412) => StoreError::Conflict {
            path: path.to_string(),
            expected: sha.unwrap_or_default().to_string(),
        },
        (WriteKind::Create, 409) => StoreError::AlreadyExists {
            path: path.to_string(),
        },
        (WriteKind::Create, 422) if reports_existing_file(&body) => StoreError::AlreadyExists {
            path: path.to_string(),
        },
        _ => StoreError::Rejected { status, body },
    }
}

/// Map a contents `GET` response. 404 is an absent document, not an error.
fn read_response(status: u16, body: String) -> Result<Option<StoredSource>, StoreError> {
    match status {
        404 => Ok(None),
        401 | 403 => Err(StoreError::Unauthorized(status)),
        200..=299 => {
            let doc: ContentsResponse = serde_json::from_str(&body)
                .map_err(|e| StoreError::Decode(format!("unexpected contents response: {e}")))?;
            decode_contents(doc).map(Some)
        }
        _ => Err(StoreError::Rejected { status, body }),
    }
}

/// `SourceStore` backed by one GitHub repository.
pub struct GitHubStore {
    client: reqwest::Client,
    api_url: Url,
    owner: String,
    repo: String,
    branch: Option<String>,
    token: String,
    timeout: Duration,
}

impl GitHubStore {
    pub fn new(
        store: &StoreConfig,
        repository: &RepositoryConfig,
        token: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(store.timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StoreError::Transport(format!("cannot build HTTP client: {e}")))?;
        let api_url = Url::parse(store.api_url.trim_end_matches('/')).map_err(|e| {
            StoreError::Transport(format!("invalid store api_url {:?}: {e}", store.api_url))
        })?;
        Ok(Self {
            client,
            api_url,
            owner: repository.owner.clone(),
            repo: repository.name.clone(),
            branch: repository.branch.clone(),
            token: token.into(),
            timeout: store.timeout(),
        })
    }

    /// Contents URL for `path`, each segment percent-encoded.
    fn contents_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport(format!("store api_url {} cannot carry a path", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str(), "contents"])
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder, StoreError> {
        Ok(self
            .client
            .request(method, self.contents_url(path)?)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout.as_secs())
        } else {
            StoreError::Transport(err.to_string())
        }
    }

    async fn put(
        &self,
        kind: WriteKind,
        path: &str,
        message: &str,
        content: &str,
        sha: Option<&str>,
    ) -> Result<CommitInfo, StoreError> {
        let body = PutRequest {
            message,
            content: STANDARD.encode(content.as_bytes()),
            sha,
            branch: self.branch.as_deref(),
        };

        let response = self
            .request(reqwest::Method::PUT, path)?
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(write_error(kind, status.as_u16(), text, path, sha));
        }

        let parsed: PutResponse = serde_json::from_str(&text)
            .map_err(|e| StoreError::Decode(format!("unexpected write response: {e}")))?;
        debug!(path, kind = ?kind, revision = %parsed.content.sha, "contents written");
        Ok(CommitInfo {
            revision: RevisionToken::new(parsed.content.sha),
            commit_id: parsed.commit.map(|c| c.sha),
        })
    }
}

#[async_trait]
impl SourceStore for GitHubStore {
    async fn get(&self, path: &str) -> Result<Option<StoredSource>, StoreError> {
        let mut request = self.request(reqwest::Method::GET, path)?;
        if let Some(branch) = &self.branch {
            request = request.query(&[("ref", branch)]);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        read_response(status, text)
    }

    async fn update(
        &self,
        path: &str,
        message: &str,
        content: &str,
        expected: &RevisionToken,
    ) -> Result<CommitInfo, StoreError> {
        self.put(WriteKind::Update, path, message, content, Some(expected.as_str()))
            .await
    }

    async fn create(
        &self,
        path: &str,
        message: &str,
        content: &str,
    ) -> Result<CommitInfo, StoreError> {
        self.put(WriteKind::Create, path, message, content, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GitHubStore {
        let repo = RepositoryConfig {
            owner: "acme".into(),
            name: "fw".into(),
            ..RepositoryConfig::default()
        };
        let cfg = StoreConfig {
            api_url: "https://ghe.example.com/api/v3/".into(),
            ..StoreConfig::default()
        };
        GitHubStore::new(&cfg, &repo, "t").unwrap()
    }

    #[test]
    fn contents_url_is_built_from_config() {
        assert_eq!(
            store().contents_url("sketches/automatic.ino").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/acme/fw/contents/sketches/automatic.ino"
        );
    }

    #[test]
    fn contents_url_on_root_api_host() {
        let cfg = StoreConfig::default();
        let gh = GitHubStore::new(&cfg, &RepositoryConfig::default(), "t").unwrap();
        assert_eq!(
            gh.contents_url("/sketches/automatic.ino").unwrap().as_str(),
            "https://api.github.com/repos/levy1107/kitmaker-firmware/contents/sketches/automatic.ino"
        );
    }

    #[test]
    fn contents_url_encodes_path_segments() {
        assert_eq!(
            store().contents_url("sketches/my sketch#2?.ino").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/acme/fw/contents/sketches/my%20sketch%232%3F.ino"
        );
    }

    #[test]
    fn missing_file_reads_as_none() {
        let read = read_response(404, r#"{"message":"Not Found"}"#.into()).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn forbidden_read_is_unauthorized() {
        let err = read_response(403, r#"{"message":"Bad credentials"}"#.into()).unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(403)));
    }

    #[test]
    fn server_error_read_is_rejected() {
        let err = read_response(502, "bad gateway".into()).unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 502, .. }));
        assert!(!err.is_concurrent_modification());
    }

    #[test]
    fn successful_read_decodes_document() {
        let body = serde_json::json!({
            "sha": "abc",
            "encoding": "base64",
            "content": STANDARD.encode("void setup(){}\n"),
        })
        .to_string();
        let doc = read_response(200, body).unwrap().unwrap();
        assert_eq!(doc.content, "void setup(){}\n");
        assert_eq!(doc.revision.as_str(), "abc");
    }

    #[test]
    fn decodes_wrapped_base64() {
        let encoded = STANDARD.encode("#define FW_VERSION \"202401010000\"\nvoid setup(){}\n");
        let (a, b) = encoded.split_at(20);
        let doc = ContentsResponse {
            sha: "abc".into(),
            content: format!("{a}\n{b}\n"),
            encoding: "base64".into(),
        };
        let src = decode_contents(doc).unwrap();
        assert_eq!(src.revision.as_str(), "abc");
        assert!(src.content.starts_with("#define FW_VERSION"));
    }

    #[test]
    fn rejects_non_base64_encoding() {
        let doc = ContentsResponse {
            sha: "abc".into(),
            content: String::new(),
            encoding: "none".into(),
        };
        assert!(matches!(decode_contents(doc), Err(StoreError::Decode(_))));
    }

    #[test]
    fn stale_sha_on_update_is_conflict() {
        let err = write_error(WriteKind::Update, 409, String::new(), "p", Some("abc"));
        assert!(matches!(err, StoreError::Conflict { ref expected, .. } if expected == "abc"));
    }

    #[test]
    fn existing_file_on_create_is_already_exists() {
        let body = r#"{"message":"Invalid request.\n\n\"sha\" wasn't supplied.","status":"422"}"#;
        let err = write_error(WriteKind::Create, 422, body.into(), "p", None);
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert!(err.is_concurrent_modification());
    }

    #[test]
    fn validation_failure_on_create_is_rejected() {
        let body = r#"{"message":"Invalid request.\n\nFor 'properties/branch', 5 is not a string."}"#;
        let err = write_error(WriteKind::Create, 422, body.into(), "p", None);
        assert!(matches!(err, StoreError::Rejected { status: 422, .. }));
        assert!(!err.is_concurrent_modification());
    }

    #[test]
    fn conflict_on_create_is_already_exists() {
        let err = write_error(WriteKind::Create, 409, String::new(), "p", None);
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn auth_and_other_statuses() {
        assert!(matches!(
            write_error(WriteKind::Update, 401, String::new(), "p", None),
            StoreError::Unauthorized(401)
        ));
        assert!(matches!(
            write_error(WriteKind::Update, 422, "bad".into(), "p", Some("x")),
            StoreError::Rejected { status: 422, .. }
        ));
    }

    #[test]
    fn put_body_omits_sha_on_create() {
        let body = PutRequest {
            message: "m",
            content: STANDARD.encode("x"),
            sha: None,
            branch: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("sha").is_none());
        assert!(json.get("branch").is_none());
        assert_eq!(json["content"], "eA==");
    }
}
