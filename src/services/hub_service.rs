//! Hub engine: subscription requests, intent verification and fan-out

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use reqwest::header::{CONTENT_TYPE, LINK};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Content, ContentSource, HttpFetcher, TaskRunner};
use crate::config::HubSettings;
use crate::crypto::{generate_challenge, signature_header, too_big, SIGNATURE_HEADER};
use crate::metrics;
use crate::models::{
    parse_lease_seconds, HubKey, HubSubscription, Mode, WebSubError, WebSubResult,
};
use crate::publisher::PublisherLinks;
use crate::store::HubStore;

pub const INVALID_MODE: &str =
    "Invalid hub.mode (should be 'subscribe' or 'unsubscribe'): ";

const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Form body of a request against the hub endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubForm {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.callback")]
    pub callback: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<String>,
    #[serde(rename = "hub.secret")]
    pub secret: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> WebSubResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| WebSubError::validation(format!("Missing form argument: {}", name)))
}

/// Accepted hub request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
    Publish,
}

impl HubMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubMode::Subscribe => "subscribe",
            HubMode::Unsubscribe => "unsubscribe",
            HubMode::Publish => "publish",
        }
    }
}

impl fmt::Display for HubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lease bounds enforced by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    pub min_seconds: u64,
    pub default_seconds: u64,
    pub max_seconds: u64,
}

impl LeasePolicy {
    pub fn from_settings(settings: &HubSettings) -> Self {
        Self {
            min_seconds: settings.min_lease_seconds,
            default_seconds: settings.default_lease_seconds,
            max_seconds: settings.max_lease_seconds,
        }
    }

    /// The lease to grant for a requested `hub.lease_seconds` value
    pub fn resolve(&self, requested: Option<&str>) -> WebSubResult<u64> {
        match requested {
            None => Ok(self.default_seconds),
            Some(value) => Ok(parse_lease_seconds(value)?.clamp(self.min_seconds, self.max_seconds)),
        }
    }
}

/// Outcome of one change notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Decides whether a `(callback_url, topic_url)` pair may subscribe.
/// `Some(reason)` denies the request.
pub type Validator = Arc<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// The hub side of WebSub
#[derive(Clone)]
pub struct HubService {
    store: Arc<HubStore>,
    settings: Arc<HubSettings>,
    leases: LeasePolicy,
    http_client: reqwest::Client,
    content_source: Arc<dyn ContentSource>,
    runner: Arc<dyn TaskRunner>,
    validators: Arc<RwLock<Vec<Validator>>>,
}

impl HubService {
    pub fn new(
        store: Arc<HubStore>,
        settings: HubSettings,
        http_client: reqwest::Client,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            store,
            leases: LeasePolicy::from_settings(&settings),
            settings: Arc::new(settings),
            content_source: Arc::new(HttpFetcher::new(http_client.clone())),
            http_client,
            runner,
            validators: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Replace the source used to fetch topic content on publish
    pub fn with_content_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.content_source = source;
        self
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn store(&self) -> &HubStore {
        self.store.as_ref()
    }

    /// Add a validator; validators run in registration order
    pub fn register_validator<F>(&self, f: F)
    where
        F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.validators.write().push(Arc::new(f));
    }

    // ========================================================================
    // Hub endpoint
    // ========================================================================

    /// Validate a hub request and queue its processing
    pub fn handle_request(&self, form: HubForm) -> WebSubResult<HubMode> {
        let mode = required(&form.mode, "hub.mode")?;
        let topic_url = required(&form.topic, "hub.topic")?.to_string();
        let callback_url = match mode {
            "subscribe" | "unsubscribe" => Some(required(&form.callback, "hub.callback")?.to_string()),
            _ => None,
        };
        let lease_seconds = self.leases.resolve(form.lease_seconds.as_deref())?;
        let secret = form.secret.clone().filter(|s| !s.is_empty());
        if secret.as_deref().is_some_and(too_big) {
            return Err(WebSubError::validation(
                "Secret is too big (should be < 200 bytes)",
            ));
        }

        let hub = self.clone();
        let accepted = match (mode, callback_url) {
            ("subscribe", Some(callback_url)) => {
                self.runner.enqueue(
                    async move { hub.subscribe(&callback_url, &topic_url, lease_seconds, secret).await }
                        .boxed(),
                );
                HubMode::Subscribe
            }
            ("unsubscribe", Some(callback_url)) => {
                self.runner
                    .enqueue(async move { hub.unsubscribe(&callback_url, &topic_url).await }.boxed());
                HubMode::Unsubscribe
            }
            ("publish", _) if self.settings.publish_supported => {
                self.runner.enqueue(
                    async move {
                        if let Err(e) = hub.send_change_notification(&topic_url, None).await {
                            warn!("Publish of {} failed: {}", topic_url, e);
                        }
                    }
                    .boxed(),
                );
                HubMode::Publish
            }
            _ => return Err(WebSubError::validation(format!("{}{}", INVALID_MODE, mode))),
        };

        metrics::record_hub_request(accepted.as_str());
        Ok(accepted)
    }

    // ========================================================================
    // Subscription processing
    // ========================================================================

    /// Validate, verify intent and store a subscription
    pub async fn subscribe(
        &self,
        callback_url: &str,
        topic_url: &str,
        lease_seconds: u64,
        secret: Option<String>,
    ) {
        if let Some(reason) = self.rejection(callback_url, topic_url) {
            self.deny(callback_url, topic_url, &reason).await;
            return;
        }

        if !self
            .verify_intent(Mode::Subscribe, callback_url, topic_url, Some(lease_seconds))
            .await
        {
            return;
        }

        let key = HubKey::new(topic_url, callback_url);
        match self.store.set(key, HubSubscription::with_lease(lease_seconds, secret)) {
            Ok(()) => {
                info!("Subscribed {} to {} for {}s", callback_url, topic_url, lease_seconds);
                metrics::record_confirmation("hub", Mode::Subscribe.as_str());
            }
            Err(e) => warn!("Could not store subscription of {}: {}", callback_url, e),
        }
    }

    /// Validate, verify intent and remove a subscription
    pub async fn unsubscribe(&self, callback_url: &str, topic_url: &str) {
        if let Some(reason) = self.rejection(callback_url, topic_url) {
            self.deny(callback_url, topic_url, &reason).await;
            return;
        }

        if !self
            .verify_intent(Mode::Unsubscribe, callback_url, topic_url, None)
            .await
        {
            return;
        }

        match self.store.delete(&HubKey::new(topic_url, callback_url)) {
            Ok(Some(_)) => {
                info!("Unsubscribed {} from {}", callback_url, topic_url);
                metrics::record_confirmation("hub", Mode::Unsubscribe.as_str());
            }
            Ok(None) => debug!("Subscription of {} to {} already gone", callback_url, topic_url),
            Err(e) => warn!("Could not remove subscription of {}: {}", callback_url, e),
        }
    }

    fn rejection(&self, callback_url: &str, topic_url: &str) -> Option<String> {
        let validators = self.validators.read().clone();
        validators.iter().find_map(|validate| validate(callback_url, topic_url))
    }

    async fn deny(&self, callback_url: &str, topic_url: &str, reason: &str) {
        info!("Denying {} for {}: {}", callback_url, topic_url, reason);
        metrics::record_denial();

        let result = self
            .http_client
            .get(callback_url)
            .query(&[("hub.mode", "denied"), ("hub.topic", topic_url), ("hub.reason", reason)])
            .send()
            .await;
        if let Err(e) = result {
            debug!("Denial notice to {} failed: {}", callback_url, e);
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self.settings.retry_backoff_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(MAX_RETRY_DELAY_MS))
    }

    /// Challenge the callback until it echoes a fresh challenge, refuses, or
    /// the attempts run out
    async fn verify_intent(
        &self,
        mode: Mode,
        callback_url: &str,
        topic_url: &str,
        lease_seconds: Option<u64>,
    ) -> bool {
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let challenge = generate_challenge();
            let mut query = vec![
                ("hub.mode", mode.as_str().to_string()),
                ("hub.topic", topic_url.to_string()),
                ("hub.challenge", challenge.clone()),
            ];
            if let Some(lease) = lease_seconds {
                query.push(("hub.lease_seconds", lease.to_string()));
            }

            match self.http_client.get(callback_url).query(&query).send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(body) if body == challenge => return true,
                    Ok(_) => warn!(
                        "Challenge mismatch from {} (attempt {}/{})",
                        callback_url, attempt, max_attempts
                    ),
                    Err(e) => warn!("Could not read confirmation from {}: {}", callback_url, e),
                },
                Ok(response) if !is_transient(response.status()) => {
                    warn!(
                        "{} refused {} of {} with status {}",
                        callback_url,
                        mode,
                        topic_url,
                        response.status()
                    );
                    return false;
                }
                Ok(response) => warn!(
                    "Confirmation of {} answered {} (attempt {}/{})",
                    callback_url,
                    response.status(),
                    attempt,
                    max_attempts
                ),
                Err(e) => warn!(
                    "Confirmation request to {} failed (attempt {}/{}): {}",
                    callback_url, attempt, max_attempts, e
                ),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry_delay(attempt)).await;
            }
        }

        warn!(
            "Giving up on {} of {} for {} after {} attempts",
            mode, topic_url, callback_url, max_attempts
        );
        false
    }

    // ========================================================================
    // Notification
    // ========================================================================

    /// Deliver the current content of `topic_url` to every live subscriber.
    ///
    /// The content must advertise this hub and the topic itself in its
    /// `Link` headers; otherwise nothing is delivered.
    pub async fn send_change_notification(
        &self,
        topic_url: &str,
        content: Option<Content>,
    ) -> WebSubResult<FanOutReport> {
        let content = match content {
            Some(content) => content,
            None => self.content_source.fetch(topic_url).await?,
        };

        let relations = content.link_relations();
        if relations.hub.as_deref() != Some(self.settings.public_url.as_str()) {
            return Err(WebSubError::notification(format!(
                "Content of {} does not advertise this hub ({}) as rel=hub",
                topic_url, self.settings.public_url
            )));
        }
        if relations.topic.as_deref() != Some(topic_url) {
            return Err(WebSubError::notification(format!(
                "Content does not advertise {} as rel=self",
                topic_url
            )));
        }

        let now = Utc::now();
        let targets: Vec<(HubKey, HubSubscription)> = self
            .store
            .scan_all()?
            .into_iter()
            .filter(|(key, sub)| key.topic_url == topic_url && !sub.is_expired(now))
            .collect();

        let link = PublisherLinks::new(topic_url, self.settings.public_url.as_str()).link_header();
        let results = join_all(
            targets
                .iter()
                .map(|(key, sub)| self.deliver(&key.callback_url, sub.secret.as_deref(), &content, &link)),
        )
        .await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let report = FanOutReport {
            delivered,
            failed: results.len() - delivered,
        };
        metrics::record_fan_out(report.delivered, report.failed);
        info!(
            "Notified subscribers of {}: {} delivered, {} failed",
            topic_url, report.delivered, report.failed
        );

        Ok(report)
    }

    /// POST the content to one callback, retrying transient failures
    async fn deliver(
        &self,
        callback_url: &str,
        secret: Option<&str>,
        content: &Content,
        link: &str,
    ) -> bool {
        let signature = secret
            .map(|secret| signature_header(self.settings.signature_algorithm, secret, &content.body));
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let mut request = self
                .http_client
                .post(callback_url)
                .header(LINK, link)
                .body(content.body.clone());
            if let Some(content_type) = content.content_type() {
                request = request.header(CONTENT_TYPE, content_type.clone());
            }
            if let Some(signature) = &signature {
                request = request.header(SIGNATURE_HEADER, signature.as_str());
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) if !is_transient(response.status()) => {
                    warn!("Delivery to {} rejected with status {}", callback_url, response.status());
                    return false;
                }
                Ok(response) => warn!(
                    "Delivery to {} answered {} (attempt {}/{})",
                    callback_url,
                    response.status(),
                    attempt,
                    max_attempts
                ),
                Err(e) => warn!(
                    "Delivery to {} failed (attempt {}/{}): {}",
                    callback_url, attempt, max_attempts, e
                ),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry_delay(attempt)).await;
            }
        }

        false
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Remove every subscription whose lease has run out
    pub fn cleanup_expired_subscriptions(&self) -> WebSubResult<usize> {
        let mut removed = 0;
        for (key, _) in self.store.scan_expiring(Utc::now())? {
            // A resubscribe may have renewed the lease since the scan
            let outcome = self.store.update(&key, &mut |current| {
                current.filter(|sub| !sub.is_expired(Utc::now()))
            })?;
            if outcome.is_none() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} expired subscriptions", removed);
        }
        metrics::record_expired_cleanup(removed);
        Ok(removed)
    }

    /// Run the expired-subscription cleanup every `interval`
    pub fn schedule_cleanup(&self, runner: &dyn TaskRunner, interval: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        runner.every(
            interval,
            Arc::new(move || {
                let hub = hub.clone();
                async move {
                    if let Err(e) = hub.cleanup_expired_subscriptions() {
                        warn!("Expired subscription cleanup failed: {}", e);
                    }
                }
                .boxed()
            }),
        )
    }
}

/// Server errors, timeouts and rate limiting are worth another attempt;
/// any other non-2xx status is a refusal
fn is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

impl fmt::Debug for HubService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubService")
            .field("public_url", &self.settings.public_url)
            .field("leases", &self.leases)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{verify, SignatureAlgorithm};
    use crate::services::TokioRunner;
    use crate::store::{MemoryStore, Store};
    use chrono::Duration as ChronoDuration;
    use reqwest::header::{HeaderMap, HeaderValue};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const HUB_URL: &str = "https://hub.example.com/hub";
    const TOPIC: &str = "https://example.com/feed";

    fn hub_settings() -> HubSettings {
        HubSettings {
            public_url: HUB_URL.to_string(),
            min_lease_seconds: 60,
            default_lease_seconds: 864_000,
            max_lease_seconds: 2_678_400,
            max_attempts: 3,
            retry_backoff_ms: 1,
            publish_supported: false,
            signature_algorithm: SignatureAlgorithm::Sha1,
            cleanup_interval_sec: 86_400,
        }
    }

    fn hub_with(settings: HubSettings) -> (HubService, MemoryStore<HubKey, HubSubscription>) {
        let store: MemoryStore<HubKey, HubSubscription> = MemoryStore::new();
        let hub = HubService::new(
            Arc::new(store.clone()),
            settings,
            reqwest::Client::new(),
            Arc::new(TokioRunner),
        );
        (hub, store)
    }

    fn hub() -> (HubService, MemoryStore<HubKey, HubSubscription>) {
        hub_with(hub_settings())
    }

    fn form(pairs: &[(&str, &str)]) -> HubForm {
        let mut form = HubForm::default();
        for (name, value) in pairs {
            let value = Some(value.to_string());
            match *name {
                "hub.mode" => form.mode = value,
                "hub.topic" => form.topic = value,
                "hub.callback" => form.callback = value,
                "hub.lease_seconds" => form.lease_seconds = value,
                "hub.secret" => form.secret = value,
                _ => {}
            }
        }
        form
    }

    fn echo_challenge(request: &Request) -> ResponseTemplate {
        let challenge = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "hub.challenge")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_string(challenge)
    }

    fn topic_content(hub_url: &str, topic_url: &str, body: &str) -> Content {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_str(&PublisherLinks::new(topic_url, hub_url).link_header()).unwrap(),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        Content::new(headers, body.as_bytes().to_vec())
    }

    #[test]
    fn test_lease_policy() {
        let leases = LeasePolicy::from_settings(&hub_settings());
        assert_eq!(leases.resolve(None).unwrap(), 864_000);
        assert_eq!(leases.resolve(Some("1")).unwrap(), 60);
        assert_eq!(leases.resolve(Some("99999999999")).unwrap(), 2_678_400);
        assert_eq!(leases.resolve(Some("3600")).unwrap(), 3600);
        assert!(leases.resolve(Some("0")).is_err());
        assert!(leases.resolve(Some("soon")).is_err());
    }

    #[tokio::test]
    async fn test_handle_request_validation() {
        let (hub, _) = hub();

        let err = hub.handle_request(form(&[("hub.topic", TOPIC)])).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Missing form argument: hub.mode");

        let err = hub.handle_request(form(&[("hub.mode", "subscribe")])).unwrap_err();
        assert!(err.to_string().contains("hub.topic"));

        let err = hub
            .handle_request(form(&[("hub.mode", "subscribe"), ("hub.topic", TOPIC)]))
            .unwrap_err();
        assert!(err.to_string().contains("hub.callback"));

        let err = hub
            .handle_request(form(&[
                ("hub.mode", "subscribe"),
                ("hub.topic", TOPIC),
                ("hub.callback", "http://cb"),
                ("hub.lease_seconds", "-5"),
            ]))
            .unwrap_err();
        assert!(matches!(err, WebSubError::Validation(_)));

        let big = "x".repeat(200);
        let err = hub
            .handle_request(form(&[
                ("hub.mode", "subscribe"),
                ("hub.topic", TOPIC),
                ("hub.callback", "http://cb"),
                ("hub.secret", &big),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("Secret is too big"));

        let err = hub
            .handle_request(form(&[("hub.mode", "publish"), ("hub.topic", TOPIC)]))
            .unwrap_err();
        assert!(err.to_string().contains(INVALID_MODE));

        let err = hub
            .handle_request(form(&[("hub.mode", "bogus"), ("hub.topic", TOPIC)]))
            .unwrap_err();
        assert!(err.to_string().ends_with("bogus"));
    }

    #[tokio::test]
    async fn test_handle_request_queues_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cb/1"))
            .respond_with(echo_challenge)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        let callback = format!("{}/cb/1", server.uri());
        let mode = hub
            .handle_request(form(&[
                ("hub.mode", "subscribe"),
                ("hub.topic", TOPIC),
                ("hub.callback", &callback),
                ("hub.lease_seconds", "100"),
            ]))
            .unwrap();
        assert_eq!(mode, HubMode::Subscribe);

        for _ in 0..100 {
            if !store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_confirmed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cb/1"))
            .and(query_param("hub.mode", "subscribe"))
            .and(query_param("hub.topic", TOPIC))
            .and(query_param("hub.lease_seconds", "100"))
            .respond_with(echo_challenge)
            .expect(1)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        let callback = format!("{}/cb/1", server.uri());
        hub.subscribe(&callback, TOPIC, 100, Some("s3cret".to_string())).await;

        let stored = store.get(&HubKey::new(TOPIC, &callback)).unwrap().unwrap();
        assert_eq!(stored.secret.as_deref(), Some("s3cret"));
        let remaining = stored.expiration_time - Utc::now();
        assert!(remaining <= ChronoDuration::seconds(100));
        assert!(remaining > ChronoDuration::seconds(95));
    }

    #[tokio::test]
    async fn test_subscribe_refused_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        hub.subscribe(&format!("{}/cb/1", server.uri()), TOPIC, 100, None).await;

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_retries_unavailable_callback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(echo_challenge)
            .expect(1)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        let callback = format!("{}/cb/1", server.uri());
        hub.subscribe(&callback, TOPIC, 100, None).await;

        assert!(store.get(&HubKey::new(TOPIC, &callback)).unwrap().is_some());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_mismatch_retries_with_fresh_challenges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("wrong"))
            .mount(&server)
            .await;

        let (hub, store) = hub();
        hub.subscribe(&format!("{}/cb/1", server.uri()), TOPIC, 100, None).await;

        assert!(store.is_empty());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);

        let challenges: std::collections::HashSet<String> = requests
            .iter()
            .filter_map(|r| {
                r.url
                    .query_pairs()
                    .find(|(k, _)| k == "hub.challenge")
                    .map(|(_, v)| v.into_owned())
            })
            .collect();
        assert_eq!(challenges.len(), 3);
    }

    #[tokio::test]
    async fn test_validator_denies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("hub.mode", "denied"))
            .and(query_param("hub.reason", "not on the list"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        hub.register_validator(|_, _| None);
        hub.register_validator(|callback, _| {
            (!callback.contains("allowed")).then(|| "not on the list".to_string())
        });

        hub.subscribe(&format!("{}/cb/1", server.uri()), TOPIC, 100, None).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("hub.mode", "unsubscribe"))
            .respond_with(echo_challenge)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        let callback = format!("{}/cb/1", server.uri());
        store
            .set(HubKey::new(TOPIC, &callback), HubSubscription::with_lease(100, None))
            .unwrap();

        hub.unsubscribe(&callback, TOPIC).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_send_change_notification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (hub, store) = hub();
        let plain = format!("{}/cb/plain", server.uri());
        let signed = format!("{}/cb/signed", server.uri());
        let expired = format!("{}/cb/expired", server.uri());
        let other = format!("{}/cb/other", server.uri());

        store.set(HubKey::new(TOPIC, &plain), HubSubscription::with_lease(100, None)).unwrap();
        store
            .set(
                HubKey::new(TOPIC, &signed),
                HubSubscription::with_lease(100, Some("S".to_string())),
            )
            .unwrap();
        store
            .set(
                HubKey::new(TOPIC, &expired),
                HubSubscription {
                    expiration_time: Utc::now() - ChronoDuration::seconds(1),
                    secret: None,
                },
            )
            .unwrap();
        store
            .set(
                HubKey::new("https://example.com/other", &other),
                HubSubscription::with_lease(100, None),
            )
            .unwrap();

        let report = hub
            .send_change_notification(TOPIC, Some(topic_content(HUB_URL, TOPIC, "hi")))
            .await
            .unwrap();
        assert_eq!(report, FanOutReport { delivered: 2, failed: 0 });

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert_eq!(request.body, b"hi".to_vec());
            assert_eq!(request.headers.get("content-type").unwrap(), "text/plain");
            assert!(request.headers.get("link").is_some());

            let signature = request.headers.get("x-hub-signature");
            if request.url.path() == "/cb/signed" {
                let header = signature.unwrap().to_str().unwrap();
                assert!(header.starts_with("sha1="));
                assert!(verify(Some(header), "S", b"hi"));
            } else {
                assert!(signature.is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_forged_notification_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        store
            .set(
                HubKey::new(TOPIC, format!("{}/cb/1", server.uri())),
                HubSubscription::with_lease(100, None),
            )
            .unwrap();

        let content = topic_content("https://evil.example.com/hub", TOPIC, "forged");
        let err = hub.send_change_notification(TOPIC, Some(content)).await.unwrap_err();
        assert!(matches!(err, WebSubError::Notification(_)));

        let content = topic_content(HUB_URL, "https://example.com/elsewhere", "forged");
        let err = hub.send_change_notification(TOPIC, Some(content)).await.unwrap_err();
        assert!(matches!(err, WebSubError::Notification(_)));
    }

    #[tokio::test]
    async fn test_failed_delivery_counted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cb/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cb/ok"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let (hub, store) = hub();
        for name in ["broken", "ok"] {
            store
                .set(
                    HubKey::new(TOPIC, format!("{}/cb/{}", server.uri(), name)),
                    HubSubscription::with_lease(100, None),
                )
                .unwrap();
        }

        let report = hub
            .send_change_notification(TOPIC, Some(topic_content(HUB_URL, TOPIC, "hi")))
            .await
            .unwrap();
        assert_eq!(report, FanOutReport { delivered: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_delivery_retried_after_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cb/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cb/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        store
            .set(
                HubKey::new(TOPIC, format!("{}/cb/flaky", server.uri())),
                HubSubscription::with_lease(100, None),
            )
            .unwrap();

        let report = hub
            .send_change_notification(TOPIC, Some(topic_content(HUB_URL, TOPIC, "hi")))
            .await
            .unwrap();
        assert_eq!(report, FanOutReport { delivered: 1, failed: 0 });
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_not_retried_when_gone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&server)
            .await;

        let (hub, store) = hub();
        store
            .set(
                HubKey::new(TOPIC, format!("{}/cb/gone", server.uri())),
                HubSubscription::with_lease(100, None),
            )
            .unwrap();

        let report = hub
            .send_change_notification(TOPIC, Some(topic_content(HUB_URL, TOPIC, "hi")))
            .await
            .unwrap();
        assert_eq!(report, FanOutReport { delivered: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_cleanup_expired_subscriptions() {
        let (hub, store) = hub();
        store
            .set(HubKey::new(TOPIC, "http://cb/live"), HubSubscription::with_lease(100, None))
            .unwrap();
        for n in 0..2 {
            store
                .set(
                    HubKey::new(TOPIC, format!("http://cb/dead-{}", n)),
                    HubSubscription {
                        expiration_time: Utc::now() - ChronoDuration::seconds(5),
                        secret: None,
                    },
                )
                .unwrap();
        }

        assert_eq!(hub.cleanup_expired_subscriptions().unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(hub.cleanup_expired_subscriptions().unwrap(), 0);
    }
}
