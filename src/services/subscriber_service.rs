//! Subscriber engine: subscription requests, confirmations, deliveries and
//! lease renewal

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{SubscriberEvents, TaskRunner};
use crate::config::SubscriberSettings;
use crate::crypto::{generate_secret, too_big, verify};
use crate::discovery::{Discovered, DiscoveryResolver};
use crate::metrics;
use crate::models::{
    lease_duration, parse_lease_seconds, Mode, PendingRequest, SubscriberSubscription, WebSubError,
    WebSubResult, INVALID_LEASE,
};
use crate::store::SubscriberStore;

pub const NO_SECRET_WITH_HTTP: &str = "Only specify a secret when using https. If you did \
     not pass one in yourself, disable AUTO_SET_SECRET.";
pub const CLEANED_INACTIVE_SUBSCRIPTION: &str = "Cleaned up an expired inactive subscription";

/// Query string of a hub's verification request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmationQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<String>,
    #[serde(rename = "hub.reason")]
    pub reason: Option<String>,
}

/// Answer to a verification request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The hub reported a denial; the request is gone
    Denied,
    /// The request was confirmed; echo this challenge
    Challenge(String),
}

/// What happened to an incoming notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// Signature missing or invalid
    Dropped,
}

/// Outcome of one renewal sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub renewed: usize,
    pub failed: usize,
    /// Unconfirmed requests removed after their TTL
    pub cleaned: usize,
}

fn is_secure(url: &str) -> bool {
    url.starts_with("https://")
}

/// The subscriber side of WebSub
#[derive(Clone)]
pub struct SubscriberService {
    store: Arc<SubscriberStore>,
    settings: Arc<SubscriberSettings>,
    http_client: reqwest::Client,
    events: Arc<SubscriberEvents>,
}

impl SubscriberService {
    pub fn new(
        store: Arc<SubscriberStore>,
        settings: SubscriberSettings,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            http_client,
            events: Arc::new(SubscriberEvents::new()),
        }
    }

    /// Listener, success and error registries of this subscriber
    pub fn events(&self) -> &SubscriberEvents {
        &self.events
    }

    pub fn settings(&self) -> &SubscriberSettings {
        &self.settings
    }

    /// Callback URL the hub is given for `callback_id`
    pub fn callback_url(&self, callback_id: &str) -> String {
        format!(
            "{}/{}",
            self.settings.callback_base_url.trim_end_matches('/'),
            callback_id
        )
    }

    pub fn subscription(&self, callback_id: &str) -> WebSubResult<Option<SubscriberSubscription>> {
        self.store.get(&callback_id.to_string())
    }

    pub fn subscriptions(&self) -> WebSubResult<Vec<(String, SubscriberSubscription)>> {
        self.store.scan_all()
    }

    /// Resolve the topic and hub URLs advertised by `url`
    pub async fn discover(&self, url: &str) -> WebSubResult<Discovered> {
        DiscoveryResolver::new(self.http_client.clone()).discover(url).await
    }

    // ========================================================================
    // Outbound requests
    // ========================================================================

    /// Ask `hub_url` to subscribe a new callback to `topic_url`
    pub async fn subscribe(
        &self,
        topic_url: &str,
        hub_url: &str,
        lease_seconds: Option<i64>,
        secret: Option<String>,
    ) -> WebSubResult<String> {
        let lease_seconds = match lease_seconds {
            Some(lease) if lease <= 0 => {
                return Err(WebSubError::subscriber(
                    "lease_seconds should be a positive integer",
                ))
            }
            Some(lease) => Some(lease as u64),
            None => None,
        };

        let secure = is_secure(hub_url);
        let secret = match secret.filter(|s| !s.is_empty()) {
            Some(secret) => Some(secret),
            None if secure && self.settings.auto_set_secret => Some(generate_secret()),
            None => None,
        };
        if let Some(secret) = &secret {
            if !secure {
                return Err(WebSubError::subscriber(NO_SECRET_WITH_HTTP));
            }
            if too_big(secret) {
                return Err(WebSubError::subscriber("Secret is too big."));
            }
        }

        let callback_id = Uuid::new_v4().to_string();
        let record = SubscriberSubscription::requested(
            topic_url,
            hub_url,
            lease_seconds,
            secret,
            self.settings.request_ttl_sec,
        );
        self.store.set(callback_id.clone(), record.clone())?;

        self.send_request(&callback_id, &record, Mode::Subscribe).await?;
        info!("Requested subscription {} to {} at {}", callback_id, topic_url, hub_url);
        Ok(callback_id)
    }

    /// Ask the hub to end an active subscription
    pub async fn unsubscribe(&self, callback_id: &str) -> WebSubResult<()> {
        let record = self.begin(callback_id, Mode::Unsubscribe)?;
        self.send_request(callback_id, &record, Mode::Unsubscribe).await?;
        info!("Requested unsubscription of {}", callback_id);
        Ok(())
    }

    /// Re-send the subscription request of an active subscription
    pub async fn renew(&self, callback_id: &str) -> WebSubResult<()> {
        let record = self.begin(callback_id, Mode::Subscribe)?;
        self.send_request(callback_id, &record, Mode::Subscribe).await?;
        debug!("Requested renewal of {}", callback_id);
        Ok(())
    }

    /// Record a new pending request on an active subscription
    fn begin(&self, callback_id: &str, mode: Mode) -> WebSubResult<SubscriberSubscription> {
        let ttl = self.settings.request_ttl_sec;
        let mut failure = None;

        let updated = self.store.update(&callback_id.to_string(), &mut |current| match current {
            Some(mut sub) if sub.active => {
                sub.mode = mode;
                sub.pending = Some(PendingRequest::new(mode, ttl));
                Some(sub)
            }
            Some(sub) => {
                failure = Some(WebSubError::subscriber("That subscription is not active."));
                Some(sub)
            }
            None => {
                failure = Some(WebSubError::subscriber(format!(
                    "Could not find subscription: {}",
                    callback_id
                )));
                None
            }
        })?;

        if let Some(err) = failure {
            return Err(err);
        }
        updated.ok_or_else(|| {
            WebSubError::subscriber(format!("Could not find subscription: {}", callback_id))
        })
    }

    async fn send_request(
        &self,
        callback_id: &str,
        record: &SubscriberSubscription,
        mode: Mode,
    ) -> WebSubResult<()> {
        let mut form = vec![
            ("hub.callback", self.callback_url(callback_id)),
            ("hub.mode", mode.as_str().to_string()),
            ("hub.topic", record.topic_url.clone()),
        ];
        if let Some(lease) = record.lease_seconds {
            form.push(("hub.lease_seconds", lease.to_string()));
        }
        if let Some(secret) = &record.secret {
            form.push(("hub.secret", secret.clone()));
        }

        let response = self.post_to_hub(&record.hub_url, &form).await?;
        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(WebSubError::subscriber(format!(
                "Hub error - {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }

    /// POST to the hub, trying an `https` upgrade of `http` URLs first
    async fn post_to_hub(
        &self,
        hub_url: &str,
        form: &[(&str, String)],
    ) -> WebSubResult<reqwest::Response> {
        if let Some(rest) = hub_url.strip_prefix("http://") {
            let upgraded = format!("https://{}", rest);
            match self.http_client.post(&upgraded).form(form).send().await {
                Ok(response) => return Ok(response),
                Err(e) => debug!("https upgrade of {} failed: {}", hub_url, e),
            }
        }

        self.http_client
            .post(hub_url)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                WebSubError::subscriber(format!("Invalid hub URL (subscribing failed): {}", e))
            })
    }

    // ========================================================================
    // Callback endpoint
    // ========================================================================

    /// Answer a hub's verification request for `callback_id`
    pub fn confirm(
        &self,
        callback_id: &str,
        query: &ConfirmationQuery,
    ) -> WebSubResult<Confirmation> {
        let mode = match query.mode.as_deref() {
            None => return Err(WebSubError::validation("Missing query argument: hub.mode")),
            Some("denied") => return self.denied(callback_id, query.reason.as_deref()),
            Some(mode) => mode
                .parse::<Mode>()
                .map_err(|_| WebSubError::validation("Invalid mode"))?,
        };

        let lease = match mode {
            Mode::Subscribe => Some(match query.lease_seconds.as_deref() {
                None => Err("Missing query argument: hub.lease_seconds"),
                Some(value) => parse_lease_seconds(value).map_err(|_| INVALID_LEASE),
            }),
            Mode::Unsubscribe => None,
        };

        let now = Utc::now();
        let mut outcome: WebSubResult<String> = Err(WebSubError::not_found("subscription", callback_id));

        self.store.update(&callback_id.to_string(), &mut |current| {
            let Some(mut sub) = current else {
                outcome = Err(WebSubError::not_found("subscription", callback_id));
                return None;
            };

            let Some(topic_url) = query.topic.as_deref() else {
                outcome = Err(WebSubError::validation("Missing query argument: hub.topic"));
                return Some(sub);
            };
            let matches = sub.live_pending(now).is_some_and(|p| p.mode == mode)
                && sub.topic_url == topic_url;
            if !matches {
                outcome = Err(WebSubError::not_found("pending request", callback_id));
                return Some(sub);
            }

            let granted = match lease {
                Some(Err(message)) => {
                    outcome = Err(WebSubError::validation(message));
                    return Some(sub);
                }
                Some(Ok(granted)) => Some(granted),
                None => None,
            };
            let Some(challenge) = query.challenge.clone() else {
                outcome = Err(WebSubError::validation("Missing query argument: hub.challenge"));
                return Some(sub);
            };
            outcome = Ok(challenge);

            match granted {
                Some(granted) => {
                    sub.active = true;
                    sub.mode = Mode::Subscribe;
                    sub.lease_seconds = Some(granted);
                    sub.expiration_time = now + lease_duration(granted);
                    sub.pending = None;
                    Some(sub)
                }
                None => None,
            }
        })?;

        let challenge = outcome.map_err(|e| {
            warn!("Rejected verification of {}: {}", callback_id, e);
            e
        })?;

        let topic_url = query.topic.as_deref().unwrap_or_default();
        info!("Confirmed {} of {} for {}", mode, topic_url, callback_id);
        metrics::record_confirmation("subscriber", mode.as_str());
        self.events.succeeded(topic_url, callback_id, mode);

        Ok(Confirmation::Challenge(challenge))
    }

    fn denied(&self, callback_id: &str, reason: Option<&str>) -> WebSubResult<Confirmation> {
        let record = self.store.delete(&callback_id.to_string())?.ok_or_else(|| {
            warn!("Could not find subscription with callback id '{}'", callback_id);
            WebSubError::not_found("subscription", callback_id)
        })?;

        let reason = reason.unwrap_or("denied");
        info!("Hub denied {} of {}: {}", callback_id, record.topic_url, reason);
        self.events.failed(
            &record.topic_url,
            callback_id,
            &WebSubError::Denied(reason.to_string()),
        );

        Ok(Confirmation::Denied)
    }

    /// Accept a notification body delivered to `callback_id`
    pub fn receive(
        &self,
        callback_id: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> WebSubResult<Delivery> {
        let sub = self
            .store
            .get(&callback_id.to_string())?
            .filter(|sub| sub.is_deliverable(Utc::now()))
            .ok_or_else(|| WebSubError::not_found("subscription", callback_id))?;

        if body.len() > self.settings.max_body_size {
            return Err(WebSubError::validation("Body too large"));
        }

        if let Some(secret) = &sub.secret {
            if !verify(signature, secret, body) {
                warn!("Dropping notification for {} with invalid signature", callback_id);
                metrics::record_notification_dropped();
                return Ok(Delivery::Dropped);
            }
        }

        metrics::record_notification_received();
        self.events.notify(&sub.topic_url, callback_id, body);
        Ok(Delivery::Accepted)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Renew subscriptions whose lease ends within `margin_seconds` and
    /// drop requests the hub never confirmed
    pub async fn renew_close_to_expiration(&self, margin_seconds: u64) -> WebSubResult<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();
        let mut renewals = Vec::new();

        for (callback_id, sub) in self.store.scan_all()? {
            let live_pending = sub.live_pending(now).is_some();

            if !sub.active {
                if !live_pending {
                    self.clean_inactive(&callback_id, &sub.topic_url, &mut report)?;
                }
                continue;
            }

            if sub.expires_within(now, margin_seconds) && !live_pending {
                renewals.push(async move {
                    let result = self.renew(&callback_id).await;
                    (callback_id, sub.topic_url, result)
                });
            } else if sub.pending.is_some() && !live_pending {
                self.store.update(&callback_id, &mut |current| {
                    current.map(|mut sub| {
                        if sub.live_pending(Utc::now()).is_none() {
                            sub.pending = None;
                        }
                        sub
                    })
                })?;
                debug!("Cleared stale request of {}", callback_id);
            }
        }

        for (callback_id, topic_url, result) in join_all(renewals).await {
            match result {
                Ok(()) => report.renewed += 1,
                Err(e) => {
                    warn!("Renewal of {} failed: {}", callback_id, e);
                    self.events.failed(&topic_url, &callback_id, &e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Renewal sweep: {} renewed, {} failed, {} cleaned",
            report.renewed, report.failed, report.cleaned
        );
        Ok(report)
    }

    fn clean_inactive(
        &self,
        callback_id: &str,
        topic_url: &str,
        report: &mut SweepReport,
    ) -> WebSubResult<()> {
        let mut removed = false;
        self.store.update(&callback_id.to_string(), &mut |current| match current {
            // A confirmation may have landed since the scan
            Some(sub) if sub.active || sub.live_pending(Utc::now()).is_some() => Some(sub),
            Some(_) => {
                removed = true;
                None
            }
            None => None,
        })?;

        if removed {
            report.cleaned += 1;
            self.events.failed(
                topic_url,
                callback_id,
                &WebSubError::HubNotResponding(CLEANED_INACTIVE_SUBSCRIPTION.to_string()),
            );
        } else {
            debug!("Request {} already resolved", callback_id);
        }
        Ok(())
    }

    /// Run the renewal sweep every `interval`
    pub fn schedule_renewal(
        &self,
        runner: &dyn TaskRunner,
        interval: Duration,
        margin_seconds: u64,
    ) -> JoinHandle<()> {
        let subscriber = self.clone();
        runner.every(
            interval,
            Arc::new(move || {
                let subscriber = subscriber.clone();
                async move {
                    if let Err(e) = subscriber.renew_close_to_expiration(margin_seconds).await {
                        warn!("Renewal sweep failed: {}", e);
                    }
                }
                .boxed()
            }),
        )
    }
}

impl std::fmt::Debug for SubscriberService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberService")
            .field("callback_base_url", &self.settings.callback_base_url)
            .field("events", &self.events)
            .finish()
    }
}
