// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for sibling controllers.

use std::time::Duration;

use luna_core::{JournalEntry, LunaError};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body of `POST /journal` and of the `GET /journal/{host}` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalBatch {
    pub journal: Vec<JournalEntry>,
}

/// Talks to the journal endpoints of other controllers.
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new(token: Option<&str>, timeout: Duration) -> Result<Self, LunaError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| LunaError::Config(format!("invalid api token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| LunaError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Deliver `entries` to the controller at `endpoint`.
    pub async fn push(&self, host: &str, endpoint: &str, entries: &[JournalEntry]) -> Result<(), LunaError> {
        let url = format!("{}/journal", endpoint.trim_end_matches('/'));
        let body = JournalBatch {
            journal: entries.to_vec(),
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| replication(host, e))?;
        check(host, response).await?;
        debug!(host, entries = entries.len(), "journal batch delivered");
        Ok(())
    }

    /// Fetch the rows `endpoint` holds for `me`.
    pub async fn fetch(&self, host: &str, endpoint: &str, me: &str) -> Result<Vec<JournalEntry>, LunaError> {
        let url = format!("{}/journal/{me}", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| replication(host, e))?;
        let batch: JournalBatch = check(host, response)
            .await?
            .json()
            .await
            .map_err(|e| replication(host, e))?;
        Ok(batch.journal)
    }

    /// Tell `endpoint` that rows for `me` up to `upto` arrived.
    pub async fn acknowledge(&self, host: &str, endpoint: &str, me: &str, upto: i64) -> Result<(), LunaError> {
        let url = format!(
            "{}/journal/{me}/_delete?upto={upto}",
            endpoint.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| replication(host, e))?;
        check(host, response).await?;
        Ok(())
    }
}

fn replication(host: &str, e: reqwest::Error) -> LunaError {
    LunaError::Replication {
        host: host.to_string(),
        message: e.to_string(),
    }
}

async fn check(host: &str, response: reqwest::Response) -> Result<reqwest::Response, LunaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LunaError::Replication {
        host: host.to_string(),
        message: format!("{status}: {body}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(id: i64) -> JournalEntry {
        JournalEntry {
            id,
            function: "OSImage.pack_osimage".to_string(),
            object: "img1".to_string(),
            param: String::new(),
            payload: String::new(),
            masteronly: false,
            misc: "req-1".to_string(),
            sendby: "ctrl2".to_string(),
            sendfor: "ctrl1".to_string(),
            sendto: "ctrl1".to_string(),
            tries: 0,
            created: String::new(),
        }
    }

    #[tokio::test]
    async fn push_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/journal"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = PeerClient::new(Some("secret"), Duration::from_secs(5)).unwrap();
        client.push("ctrl1", &server.uri(), &[entry(1)]).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_push_is_a_replication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = PeerClient::new(None, Duration::from_secs(5)).unwrap();
        let err = client.push("ctrl1", &server.uri(), &[entry(1)]).await.unwrap_err();
        assert!(matches!(err, LunaError::Replication { ref host, .. } if host == "ctrl1"));
    }

    #[tokio::test]
    async fn fetch_and_acknowledge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/journal/ctrl1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JournalBatch {
                journal: vec![entry(4), entry(9)],
            }))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/journal/ctrl1/_delete"))
            .and(query_param("upto", "9"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = PeerClient::new(None, Duration::from_secs(5)).unwrap();
        let rows = client.fetch("ctrl2", &server.uri(), "ctrl1").await.unwrap();
        assert_eq!(rows.len(), 2);
        client.acknowledge("ctrl2", &server.uri(), "ctrl1", 9).await.unwrap();
    }
}
