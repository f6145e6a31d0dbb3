//! Publisher support
//!
//! A topic page advertises its hub and canonical URL twice: in a `Link`
//! header and in `<link>` elements of its body.

use actix_web::http::header::{HeaderValue, LINK};
use actix_web::HttpResponse;
use serde::Serialize;

use crate::models::{WebSubError, WebSubResult};

/// The `self` and `hub` links of one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublisherLinks {
    pub self_url: String,
    pub hub_url: String,
}

impl PublisherLinks {
    pub fn new(self_url: impl Into<String>, hub_url: impl Into<String>) -> Self {
        Self {
            self_url: self_url.into(),
            hub_url: hub_url.into(),
        }
    }

    /// `Link` header value carrying both relations
    pub fn link_header(&self) -> String {
        format!(r#"<{}>; rel="self", <{}>; rel="hub""#, self.self_url, self.hub_url)
    }

    /// `<link>` element for the topic itself
    pub fn self_link(&self) -> String {
        format!(r#"<link rel="self" href="{}" />"#, escape_attribute(&self.self_url))
    }

    /// `<link>` element for the hub
    pub fn hub_link(&self) -> String {
        format!(r#"<link rel="hub" href="{}" />"#, escape_attribute(&self.hub_url))
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Resolves the links a topic response carries
#[derive(Debug, Clone)]
pub struct Publisher {
    hub_url: String,
}

impl Publisher {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
        }
    }

    /// Links for a topic served at `request_url`. The request URL, query
    /// string included, is the topic URL unless `self_url` overrides it.
    pub fn links(&self, request_url: &str, self_url: Option<&str>) -> PublisherLinks {
        PublisherLinks::new(self_url.unwrap_or(request_url), self.hub_url.as_str())
    }

    /// Append the `Link` header for `links` to `response`
    pub fn apply(links: &PublisherLinks, response: &mut HttpResponse) -> WebSubResult<()> {
        let value = HeaderValue::from_str(&links.link_header())
            .map_err(|e| WebSubError::validation(format!("Invalid link URL: {}", e)))?;
        response.headers_mut().append(LINK, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::LinkRelations;

    #[test]
    fn test_link_header() {
        let links = PublisherLinks::new("http://example.com/feed", "http://hub.example.com/");
        assert_eq!(
            links.link_header(),
            r#"<http://example.com/feed>; rel="self", <http://hub.example.com/>; rel="hub""#
        );

        let relations = LinkRelations::from_header_values([links.link_header().as_str()]);
        assert_eq!(relations.topic.as_deref(), Some("http://example.com/feed"));
        assert_eq!(relations.hub.as_deref(), Some("http://hub.example.com/"));
    }

    #[test]
    fn test_html_links() {
        let links = PublisherLinks::new("http://example.com/?a=1&b=2", "http://hub.example.com/");
        assert_eq!(
            links.self_link(),
            r#"<link rel="self" href="http://example.com/?a=1&amp;b=2" />"#
        );
        assert_eq!(links.hub_link(), r#"<link rel="hub" href="http://hub.example.com/" />"#);
    }

    #[test]
    fn test_links_default_to_request_url() {
        let publisher = Publisher::new("http://hub.example.com/");

        let links = publisher.links("http://localhost/?x=1", None);
        assert_eq!(links.self_url, "http://localhost/?x=1");
        assert_eq!(links.hub_url, "http://hub.example.com/");

        let links = publisher.links("http://localhost/?x=1", Some("http://localhost/"));
        assert_eq!(links.self_url, "http://localhost/");
    }

    #[test]
    fn test_apply_appends_header() {
        let links = PublisherLinks::new("http://example.com/feed", "http://hub.example.com/");
        let mut response = HttpResponse::Ok().insert_header((LINK, "</other>; rel=\"alternate\"")).finish();

        Publisher::apply(&links, &mut response).unwrap();

        let values: Vec<_> = response.headers().get_all(LINK).collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].to_str().unwrap(), links.link_header());
    }
}
