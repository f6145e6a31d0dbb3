//! Topic and hub discovery for arbitrary resource URLs

use reqwest::header::LINK;
use serde::Serialize;
use tracing::debug;

use super::{scan_html_links, LinkRelations};
use crate::models::{WebSubError, WebSubResult};

/// Discovery stops reading a resource body after this many bytes
pub const MAX_DISCOVERY_BODY: usize = 1024 * 1024;

/// Canonical topic URL and hub URL advertised by a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discovered {
    pub topic_url: String,
    pub hub_url: String,
}

impl TryFrom<LinkRelations> for Discovered {
    type Error = WebSubError;

    fn try_from(relations: LinkRelations) -> Result<Self, Self::Error> {
        match (relations.topic, relations.hub) {
            (Some(topic_url), Some(hub_url)) => Ok(Discovered { topic_url, hub_url }),
            (_, None) => Err(WebSubError::Discovery(
                "Could not find hub url in topic page".to_string(),
            )),
            (None, _) => Err(WebSubError::Discovery(
                "Could not find self url in topic page".to_string(),
            )),
        }
    }
}

/// Resolves `rel="hub"` / `rel="self"` for a resource, first from its `Link`
/// headers and then from `<link>` elements in its body. Every call is a fresh
/// request.
#[derive(Clone, Debug)]
pub struct DiscoveryResolver {
    http_client: reqwest::Client,
}

impl DiscoveryResolver {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    pub async fn discover(&self, url: &str) -> WebSubResult<Discovered> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WebSubError::Discovery(format!("Could not load {}: {}", url, e)))?;

        let mut relations = LinkRelations::from_header_values(
            response
                .headers()
                .get_all(LINK)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );

        if !relations.is_complete() {
            debug!("Link headers of {} incomplete, scanning body", url);
            relations = scan_body(url, response, relations).await?;
        }

        Discovered::try_from(relations)
    }
}

/// Read the body chunk by chunk until both relations are found or the
/// size cap is reached. Each pass rescans the buffer so tags split across
/// chunks are still seen.
async fn scan_body(
    url: &str,
    mut response: reqwest::Response,
    from_headers: LinkRelations,
) -> WebSubResult<LinkRelations> {
    let mut body = Vec::new();
    let mut relations = from_headers.clone();

    while body.len() < MAX_DISCOVERY_BODY {
        let chunk = response
            .chunk()
            .await
            .map_err(|e| WebSubError::Discovery(format!("Could not read {}: {}", url, e)))?;
        let Some(chunk) = chunk else {
            break;
        };
        body.extend_from_slice(&chunk);
        body.truncate(MAX_DISCOVERY_BODY);

        relations = from_headers.clone();
        scan_html_links(&String::from_utf8_lossy(&body), &mut relations);
        if relations.is_complete() {
            break;
        }
    }

    Ok(relations)
}
