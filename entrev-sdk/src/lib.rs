//! # entrev-sdk
//!
//! SDK for content hosts to report entity changes to an entrev server and
//! drive undo and rollback.
//!
//! ## Example
//!
//! ```no_run
//! use entrev_sdk::EntrevClient;
//! use serde_json::json;
//!
//! let client = EntrevClient::new("http://localhost:3030");
//!
//! // Mirror a post the host just wrote
//! let saved = client
//!     .entity_saved("post", None, json!({"post_title": "Hello", "post_status": "publish"}))
//!     .unwrap();
//!
//! // Undo it again
//! if let Some(commit) = saved.commit {
//!     client.undo(&[commit.as_str()]).unwrap();
//! }
//! ```

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone)]
pub struct EntrevClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct EntityRequest<'a> {
    kind: &'a str,
    vp_id: Option<&'a str>,
    fields: Value,
    action: Option<&'a str>,
}

#[derive(Serialize)]
struct UndoRequest<'a> {
    hashes: &'a [&'a str],
}

#[derive(Serialize)]
struct RollbackRequest<'a> {
    target: &'a str,
}

/// What the server recorded for a save or delete.
#[derive(Debug, Clone, Deserialize)]
pub struct Saved {
    pub vp_id: String,
    pub commit: Option<String>,
}

/// Result of an undo or rollback.
#[derive(Debug, Clone, Deserialize)]
pub struct Reverted {
    pub commit: Option<String>,
    pub reverted: Vec<String>,
    pub resynced: Vec<Value>,
}

/// Snapshot a commit touched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityAddress {
    pub kind: String,
    pub id: String,
}

/// One line of the commit table.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitRow {
    pub hash: String,
    /// RFC 3339
    pub timestamp: String,
    pub summary: String,
    /// Tagged by `type`: `entity`, `undo`, `rollback` or `activate`.
    pub message: Value,
    pub entities: Vec<EntityAddress>,
    pub is_enabled: bool,
    pub can_undo: bool,
    pub can_rollback: bool,
}

impl EntrevClient {
    /// Create a new entrev client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the entrev server (e.g., "http://localhost:3030")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turns an error response into an error carrying the server's message.
    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: Value = response.json().unwrap_or(Value::Null);
        match body["error"].as_str() {
            Some(message) => bail!("{} ({})", message, status),
            None => bail!("request failed ({})", status),
        }
    }

    /// Announce that an entity was created or updated in the live store.
    /// Without `vp_id` the server assigns a fresh identity.
    pub fn entity_saved(&self, kind: &str, vp_id: Option<&str>, fields: Value) -> Result<Saved> {
        self.save(kind, vp_id, fields, None)
    }

    /// Like [`EntrevClient::entity_saved`] with an explicit action such as
    /// `trash` or `approve`.
    pub fn entity_saved_as(
        &self,
        kind: &str,
        vp_id: &str,
        fields: Value,
        action: &str,
    ) -> Result<Saved> {
        self.save(kind, Some(vp_id), fields, Some(action))
    }

    fn save(
        &self,
        kind: &str,
        vp_id: Option<&str>,
        fields: Value,
        action: Option<&str>,
    ) -> Result<Saved> {
        let request = EntityRequest {
            kind,
            vp_id,
            fields,
            action,
        };

        let response = self
            .client
            .post(self.url("/entities"))
            .json(&request)
            .send()?;

        Ok(Self::check(response)?.json()?)
    }

    /// Announce that an entity was deleted from the live store
    pub fn entity_deleted(&self, kind: &str, vp_id: &str) -> Result<Saved> {
        let response = self
            .client
            .delete(self.url(&format!("/entities/{}/{}", kind, vp_id)))
            .send()?;

        Ok(Self::check(response)?.json()?)
    }

    /// One page of commit rows, newest first
    pub fn commit_rows(&self, page: usize, page_size: usize) -> Result<Vec<CommitRow>> {
        let response = self
            .client
            .get(self.url("/commits"))
            .query(&[("page", page), ("page_size", page_size)])
            .send()?;

        Ok(Self::check(response)?.json()?)
    }

    /// Hashes of commits that can be undone right now
    pub fn selectable_commits(&self) -> Result<Vec<String>> {
        let response = self.client.get(self.url("/commits/selectable")).send()?;
        Ok(Self::check(response)?.json()?)
    }

    pub fn undo(&self, hashes: &[&str]) -> Result<Reverted> {
        let response = self
            .client
            .post(self.url("/undo"))
            .json(&UndoRequest { hashes })
            .send()?;

        Ok(Self::check(response)?.json()?)
    }

    pub fn rollback(&self, target: &str) -> Result<Reverted> {
        let response = self
            .client
            .post(self.url("/rollback"))
            .json(&RollbackRequest { target })
            .send()?;

        Ok(Self::check(response)?.json()?)
    }

    /// Check server health
    pub fn health_check(&self) -> Result<bool> {
        let response = self.client.get(self.url("/health")).send()?;

        Ok(response.status().is_success())
    }
}
