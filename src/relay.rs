//! HTTP client for the relay's wire protocol.
//!
//! Every call is best-effort: network failures are logged by the caller and swallowed here
//! as an `Outcome::Unreachable`, because the relay is eventually consistent (a later `/line`
//! conflict drives a full `/sync`) and local disk state is always the system of record.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::types::{KeyState, StatusReport, TranscriptLine};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a best-effort relay call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Conflict,
    /// Any other non-2xx status.
    Rejected(u16),
    Unreachable,
}

impl Outcome {
    fn from_status(status: StatusCode) -> Self {
        if status.is_success() {
            Outcome::Ok
        } else if status == StatusCode::CONFLICT {
            Outcome::Conflict
        } else {
            Outcome::Rejected(status.as_u16())
        }
    }
}

#[derive(Clone)]
pub struct RelayClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with sane defaults always builds");

        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn key_url(&self, key: &str, path: &str) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), key, path)
    }

    pub async fn activate(
        &self,
        key: &str,
        stream_id: &str,
        title: &str,
        start_time: &str,
        media_type: &str,
    ) -> Outcome {
        let url = self.key_url(key, "activate");
        let req = self
            .http
            .post(url)
            .header("X-API-Key", &self.api_key)
            .query(&[
                ("id", stream_id),
                ("title", title),
                ("startTime", start_time),
                ("mediaType", media_type),
            ]);

        match req.send().await {
            Ok(resp) => Outcome::from_status(resp.status()),
            Err(_) => Outcome::Unreachable,
        }
    }

    pub async fn deactivate(&self, key: &str, stream_id: &str) -> Outcome {
        if stream_id.is_empty() {
            return Outcome::Ok;
        }

        let url = self.key_url(key, "deactivate");
        let req = self
            .http
            .post(url)
            .header("X-API-Key", &self.api_key)
            .query(&[("id", stream_id)]);

        match req.send().await {
            Ok(resp) => Outcome::from_status(resp.status()),
            Err(_) => Outcome::Unreachable,
        }
    }

    pub async fn post_line(&self, key: &str, line: &TranscriptLine) -> Outcome {
        self.post_json(&self.key_url(key, "line"), line).await
    }

    pub async fn sync(&self, key: &str, state: &KeyState) -> Outcome {
        self.post_json(&self.key_url(key, "sync"), state).await
    }

    pub async fn upload_media(&self, key: &str, line_id: i64, bytes: Vec<u8>) -> Outcome {
        let url = self.key_url(key, &format!("media/{line_id}"));
        let part = reqwest::multipart::Part::bytes(bytes).file_name("media.bin");
        let form = reqwest::multipart::Form::new().part("file", part);

        let req = self
            .http
            .post(url)
            .header("X-API-Key", &self.api_key)
            .multipart(form);

        match req.send().await {
            Ok(resp) => Outcome::from_status(resp.status()),
            Err(_) => Outcome::Unreachable,
        }
    }

    pub async fn status(&self, report: &StatusReport) -> Outcome {
        let url = format!("{}/status", self.base_url.trim_end_matches('/'));
        self.post_json(&url, report).await
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Outcome {
        let req = self
            .http
            .post(url)
            .header("X-API-Key", &self.api_key)
            .json(body);

        match req.send().await {
            Ok(resp) => Outcome::from_status(resp.status()),
            Err(_) => Outcome::Unreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TranscriptSegment;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_line() -> TranscriptLine {
        TranscriptLine {
            id: 3,
            timestamp: 10,
            media_available: false,
            segments: vec![TranscriptSegment {
                timestamp: 10,
                text: "hello".into(),
            }],
        }
    }

    #[tokio::test]
    async fn activate_sends_api_key_and_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/key1/activate"))
            .and(header("X-API-Key", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = RelayClient::new(server.uri(), "secret");
        let outcome = client.activate("key1", "X", "Title", "0", "audio").await;
        assert_eq!(outcome, Outcome::Ok);
    }

    #[tokio::test]
    async fn post_line_reports_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/key1/line"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = RelayClient::new(server.uri(), "secret");
        let outcome = client.post_line("key1", &sample_line()).await;
        assert_eq!(outcome, Outcome::Conflict);
    }

    #[tokio::test]
    async fn deactivate_skips_network_call_for_empty_id() {
        let server = MockServer::start().await;
        // No mock registered; a real call would fail wiremock's strict routing if hit.
        let client = RelayClient::new(server.uri(), "secret");
        let outcome = client.deactivate("key1", "").await;
        assert_eq!(outcome, Outcome::Ok);
    }

    #[tokio::test]
    async fn upload_media_posts_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/key1/media/42"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = RelayClient::new(server.uri(), "secret");
        let outcome = client.upload_media("key1", 42, vec![1, 2, 3]).await;
        assert_eq!(outcome, Outcome::Ok);
    }

    #[tokio::test]
    async fn unreachable_host_is_reported_as_unreachable() {
        let client = RelayClient::new("http://127.0.0.1:1", "secret");
        let outcome = client.deactivate("key1", "X").await;
        assert_eq!(outcome, Outcome::Unreachable);
    }
}
