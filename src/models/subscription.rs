//! Subscription records kept by the hub and by the subscriber

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{WebSubError, WebSubResult};

/// Subscription mode carried in `hub.mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Subscribe,
    Unsubscribe,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Subscribe => "subscribe",
            Mode::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = WebSubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(Mode::Subscribe),
            "unsubscribe" => Ok(Mode::Unsubscribe),
            other => Err(WebSubError::validation(format!("Invalid mode: {}", other))),
        }
    }
}

/// Outbound request still waiting for the hub's confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub mode: Mode,
    pub expires_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(mode: Mode, ttl_seconds: u64) -> Self {
        Self {
            mode,
            expires_at: Utc::now() + lease_duration(ttl_seconds),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Lifecycle state of a subscriber-side record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Sent to the hub, never confirmed
    Requested,
    Active,
    /// Active, with a renewal awaiting confirmation
    Renewing,
    /// Active, with an unsubscribe awaiting confirmation
    Unsubscribing,
}

/// Subscriber-side subscription, keyed by callback id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberSubscription {
    pub topic_url: String,
    pub hub_url: String,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Lease requested from the hub
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<u64>,
    pub expiration_time: DateTime<Utc>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingRequest>,
}

impl SubscriberSubscription {
    /// A fresh, unconfirmed subscription whose record lives as long as its request
    pub fn requested(
        topic_url: impl Into<String>,
        hub_url: impl Into<String>,
        lease_seconds: Option<u64>,
        secret: Option<String>,
        ttl_seconds: u64,
    ) -> Self {
        let pending = PendingRequest::new(Mode::Subscribe, ttl_seconds);
        Self {
            topic_url: topic_url.into(),
            hub_url: hub_url.into(),
            mode: Mode::Subscribe,
            secret,
            lease_seconds,
            expiration_time: pending.expires_at,
            active: false,
            pending: Some(pending),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        match (self.active, self.pending.as_ref().map(|p| p.mode)) {
            (false, _) => SubscriptionState::Requested,
            (true, None) => SubscriptionState::Active,
            (true, Some(Mode::Subscribe)) => SubscriptionState::Renewing,
            (true, Some(Mode::Unsubscribe)) => SubscriptionState::Unsubscribing,
        }
    }

    /// Pending request that may still be confirmed
    pub fn live_pending(&self, now: DateTime<Utc>) -> Option<&PendingRequest> {
        self.pending.as_ref().filter(|p| !p.is_expired(now))
    }

    pub fn is_deliverable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expiration_time > now
    }

    /// Whether the lease ends within `margin_seconds` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, margin_seconds: u64) -> bool {
        self.expiration_time <= now + lease_duration(margin_seconds)
    }
}

/// Hub-side subscription key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HubKey {
    pub topic_url: String,
    pub callback_url: String,
}

impl HubKey {
    pub fn new(topic_url: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self {
            topic_url: topic_url.into(),
            callback_url: callback_url.into(),
        }
    }
}

/// Hub-side subscription, keyed by (topic_url, callback_url)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSubscription {
    pub expiration_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl HubSubscription {
    pub fn with_lease(lease_seconds: u64, secret: Option<String>) -> Self {
        Self {
            expiration_time: Utc::now() + lease_duration(lease_seconds),
            secret,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time <= now
    }
}

/// Parse a lease value that must be a positive integer
pub fn parse_lease_seconds(value: &str) -> WebSubResult<u64> {
    let trimmed = value.trim();
    match trimmed.parse::<u64>() {
        Ok(0) => Err(WebSubError::validation(INVALID_LEASE)),
        Ok(lease) => Ok(lease),
        // Out-of-range but well-formed values saturate; callers clamp them
        Err(_) if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) => {
            Ok(u64::MAX)
        }
        Err(_) => Err(WebSubError::validation(INVALID_LEASE)),
    }
}

/// Converts a lease into a duration, saturating at a hundred years
pub fn lease_duration(seconds: u64) -> Duration {
    Duration::seconds(seconds.min(LEASE_CEILING_SECONDS) as i64)
}

const LEASE_CEILING_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

pub const INVALID_LEASE: &str = "Invalid hub.lease_seconds (should be a positive integer)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lease_seconds() {
        assert_eq!(parse_lease_seconds("100").unwrap(), 100);
        assert_eq!(parse_lease_seconds("10000000000000000000000").unwrap(), u64::MAX);
        assert!(parse_lease_seconds("0").is_err());
        assert!(parse_lease_seconds("-10").is_err());
        assert!(parse_lease_seconds("abc").is_err());
        assert!(parse_lease_seconds("").is_err());
    }

    #[test]
    fn test_subscription_state() {
        let mut sub = SubscriberSubscription::requested(
            "http://example.com/feed",
            "https://hub.example.com",
            Some(100),
            None,
            600,
        );
        assert_eq!(sub.state(), SubscriptionState::Requested);
        assert!(!sub.is_deliverable(Utc::now()));

        sub.active = true;
        sub.pending = None;
        sub.expiration_time = Utc::now() + Duration::seconds(100);
        assert_eq!(sub.state(), SubscriptionState::Active);
        assert!(sub.is_deliverable(Utc::now()));

        sub.pending = Some(PendingRequest::new(Mode::Unsubscribe, 600));
        assert_eq!(sub.state(), SubscriptionState::Unsubscribing);
    }

    #[test]
    fn test_pending_expiry() {
        let pending = PendingRequest::new(Mode::Subscribe, 600);
        assert!(!pending.is_expired(Utc::now()));
        assert!(pending.is_expired(Utc::now() + Duration::seconds(601)));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("subscribe".parse::<Mode>().unwrap(), Mode::Subscribe);
        assert_eq!("unsubscribe".parse::<Mode>().unwrap(), Mode::Unsubscribe);
        assert!("denied".parse::<Mode>().is_err());
    }
}
