//! Fetches the updated content of a topic for fan-out

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LINK};

use crate::discovery::LinkRelations;
use crate::models::{WebSubError, WebSubResult};

/// Updated topic content: response headers plus the raw body
#[derive(Debug, Clone, Default)]
pub struct Content {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Content {
    pub fn new(headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.headers.get(CONTENT_TYPE)
    }

    /// `hub` and `self` relations advertised in the `Link` headers
    pub fn link_relations(&self) -> LinkRelations {
        LinkRelations::from_header_values(
            self.headers
                .get_all(LINK)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        )
    }
}

/// Source of topic content when a publish does not carry it
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, topic_url: &str) -> WebSubResult<Content>;
}

/// Fetches topic content with a plain GET
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ContentSource for HttpFetcher {
    async fn fetch(&self, topic_url: &str) -> WebSubResult<Content> {
        let response = self
            .http_client
            .get(topic_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                WebSubError::notification(format!("Could not fetch {}: {}", topic_url, e))
            })?;

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            WebSubError::notification(format!("Could not read {}: {}", topic_url, e))
        })?;

        Ok(Content::new(headers, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_topic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Link",
                        r#"<http://hub.example.com/>; rel="hub", <http://example.com/feed>; rel="self""#,
                    )
                    .set_body_raw("<feed/>", "application/atom+xml"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let content = fetcher.fetch(&format!("{}/feed", server.uri())).await.unwrap();

        assert_eq!(content.body, b"<feed/>".to_vec());
        assert_eq!(content.content_type().unwrap(), "application/atom+xml");

        let relations = content.link_relations();
        assert_eq!(relations.hub.as_deref(), Some("http://hub.example.com/"));
        assert_eq!(relations.topic.as_deref(), Some("http://example.com/feed"));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let err = fetcher.fetch(&format!("{}/feed", server.uri())).await.unwrap_err();
        assert!(matches!(err, WebSubError::Notification(_)));
    }
}
