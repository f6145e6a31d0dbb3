//! Prometheus metrics integration

use actix_web::{get, HttpResponse};
use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec, TextEncoder};

static HUB_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("websub_hub_requests_total", "Hub requests accepted, by mode"),
        &["mode"]
    )
    .expect("Failed to create hub requests counter")
});

static CONFIRMATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("websub_confirmations_total", "Confirmed subscription requests, by side and mode"),
        &["side", "mode"]
    )
    .expect("Failed to create confirmations counter")
});

static DENIALS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!("websub_denials_total", "Subscription requests denied"))
        .expect("Failed to create denials counter")
});

static NOTIFICATIONS_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "websub_notifications_sent_total",
        "Notifications delivered to subscribers"
    ))
    .expect("Failed to create notifications sent counter")
});

static NOTIFICATIONS_FAILED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "websub_notifications_failed_total",
        "Notification deliveries that failed"
    ))
    .expect("Failed to create notifications failed counter")
});

static NOTIFICATIONS_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "websub_notifications_received_total",
        "Notifications accepted by the subscriber"
    ))
    .expect("Failed to create notifications received counter")
});

static NOTIFICATIONS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "websub_notifications_dropped_total",
        "Notifications dropped for an invalid signature"
    ))
    .expect("Failed to create notifications dropped counter")
});

static EXPIRED_CLEANUPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "websub_expired_cleanups_total",
        "Expired hub subscriptions removed"
    ))
    .expect("Failed to create expired cleanups counter")
});

/// Initialize all metrics
pub fn init_metrics() {
    // Force lazy initialization
    Lazy::force(&HUB_REQUESTS_TOTAL);
    Lazy::force(&CONFIRMATIONS_TOTAL);
    Lazy::force(&DENIALS_TOTAL);
    Lazy::force(&NOTIFICATIONS_SENT_TOTAL);
    Lazy::force(&NOTIFICATIONS_FAILED_TOTAL);
    Lazy::force(&NOTIFICATIONS_RECEIVED_TOTAL);
    Lazy::force(&NOTIFICATIONS_DROPPED_TOTAL);
    Lazy::force(&EXPIRED_CLEANUPS_TOTAL);
}

/// Record an accepted hub request
pub fn record_hub_request(mode: &str) {
    HUB_REQUESTS_TOTAL.with_label_values(&[mode]).inc();
}

/// Record a confirmed request; `side` is `hub` or `subscriber`
pub fn record_confirmation(side: &str, mode: &str) {
    CONFIRMATIONS_TOTAL.with_label_values(&[side, mode]).inc();
}

pub fn record_denial() {
    DENIALS_TOTAL.inc();
}

/// Record the outcome of one fan-out
pub fn record_fan_out(delivered: usize, failed: usize) {
    NOTIFICATIONS_SENT_TOTAL.inc_by(delivered as u64);
    NOTIFICATIONS_FAILED_TOTAL.inc_by(failed as u64);
}

pub fn record_notification_received() {
    NOTIFICATIONS_RECEIVED_TOTAL.inc();
}

pub fn record_notification_dropped() {
    NOTIFICATIONS_DROPPED_TOTAL.inc();
}

pub fn record_expired_cleanup(count: usize) {
    EXPIRED_CLEANUPS_TOTAL.inc_by(count as u64);
}

/// Prometheus metrics endpoint
#[get("/metrics")]
pub async fn metrics_endpoint() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("Failed to encode metrics: {}", e));
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics();

        record_hub_request("subscribe");
        record_confirmation("hub", "subscribe");
        record_fan_out(2, 1);

        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"websub_hub_requests_total".to_string()));
        assert!(names.contains(&"websub_notifications_sent_total".to_string()));
    }
}
