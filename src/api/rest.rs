//! REST API endpoints using Actix-Web

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::responses::{api_error, protocol_error, ApiResponse};
use crate::config::{Settings, StorageBackend};
use crate::crypto::SIGNATURE_HEADER;
use crate::models::{
    HubKey, HubSubscription, SubscriberSubscription, SubscriptionState, WebSubError, WebSubResult,
};
use crate::publisher::Publisher;
use crate::services::{
    Confirmation, ConfirmationQuery, HubForm, HubService, SubscriberService, TaskRunner,
};
use crate::store::{HubStore, MemoryStore, RocksStore, SubscriberStore, HUB_CF, SUBSCRIBER_CF};

use super::health::configure_health_routes;

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub hub: HubService,
    pub subscriber: SubscriberService,
    pub publisher: Publisher,
}

impl ApiState {
    pub fn new(hub: HubService, subscriber: SubscriberService, publisher: Publisher) -> Self {
        Self {
            hub,
            subscriber,
            publisher,
        }
    }

    /// Open the configured storage and build both engines
    pub fn from_settings(settings: &Settings, runner: Arc<dyn TaskRunner>) -> WebSubResult<Self> {
        let hub_store: Arc<HubStore>;
        let subscriber_store: Arc<SubscriberStore>;

        match settings.database.backend {
            StorageBackend::Memory => {
                hub_store = Arc::new(MemoryStore::<HubKey, HubSubscription>::new());
                subscriber_store = Arc::new(MemoryStore::<String, SubscriberSubscription>::new());
            }
            StorageBackend::Rocksdb => {
                let rocks = RocksStore::open_with_opts(
                    &settings.database.data_dir,
                    settings.database.cache_size_mb,
                    settings.database.compression,
                )?;
                hub_store = Arc::new(rocks.column::<HubKey, HubSubscription>(HUB_CF));
                subscriber_store =
                    Arc::new(rocks.column::<String, SubscriberSubscription>(SUBSCRIBER_CF));
            }
        }

        let http_client = settings.http.client();
        let hub = HubService::new(hub_store, settings.hub.clone(), http_client.clone(), runner);
        let subscriber =
            SubscriberService::new(subscriber_store, settings.subscriber.clone(), http_client);
        let publisher = Publisher::new(settings.hub.public_url.clone());

        Ok(Self::new(hub, subscriber, publisher))
    }
}

/// Configure all routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Health endpoints at root
    configure_health_routes(cfg);

    // WebSub protocol endpoints
    cfg.service(web::resource("/").route(web::get().to(topic_page)))
        .service(web::resource("/hub").route(web::post().to(hub_endpoint)))
        .service(
            web::resource("/callbacks/{callback_id}")
                .route(web::get().to(confirm_callback))
                .route(web::post().to(receive_notification)),
        );

    // Management API
    cfg.service(web::scope("/api/v1").configure(configure_v1_routes));
}

fn configure_v1_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/subscriptions")
            .route("", web::get().to(list_subscriptions))
            .route("", web::post().to(create_subscription))
            .route("/sweep", web::post().to(sweep_subscriptions))
            .route("/{callback_id}", web::get().to(get_subscription))
            .route("/{callback_id}", web::delete().to(delete_subscription))
            .route("/{callback_id}/renew", web::post().to(renew_subscription)),
    )
    .route("/topics/notify", web::post().to(notify_topic))
    .route("/hub/cleanup", web::post().to(cleanup_hub));
}

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

// ============================================================================
// Protocol Handlers
// ============================================================================

async fn hub_endpoint(
    state: web::Data<ApiState>,
    form: web::Form<HubForm>,
) -> Result<HttpResponse, actix_web::Error> {
    let mode = state.hub.handle_request(form.into_inner()).map_err(protocol_error)?;

    Ok(HttpResponse::Accepted()
        .content_type(TEXT_PLAIN)
        .body(format!("Request received: {}\n", mode)))
}

async fn confirm_callback(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    query: web::Query<ConfirmationQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let callback_id = path.into_inner();
    let body = match state
        .subscriber
        .confirm(&callback_id, &query)
        .map_err(protocol_error)?
    {
        Confirmation::Denied => "'denied' acknowledged\n".to_string(),
        Confirmation::Challenge(challenge) => challenge,
    };

    Ok(HttpResponse::Ok().content_type(TEXT_PLAIN).body(body))
}

async fn receive_notification(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    req: HttpRequest,
    mut payload: web::Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let callback_id = path.into_inner();
    let limit = state.subscriber.settings().max_body_size;

    // Stop reading once the limit is passed; the engine rejects the body
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        body.extend_from_slice(&chunk?);
        if body.len() > limit {
            break;
        }
    }

    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    state
        .subscriber
        .receive(&callback_id, &body, signature)
        .map_err(protocol_error)?;

    Ok(HttpResponse::Ok().content_type(TEXT_PLAIN).body("Content received\n"))
}

const TOPIC_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>WebSub topic</title>
    {self_link}
    {hub_link}
  </head>
  <body>
    <p>This page is a WebSub topic. Subscribe to it through its hub.</p>
    <p>Rendered at {rendered_at}.</p>
  </body>
</html>
"#;

/// Demo topic advertising this hub
async fn topic_page(
    req: HttpRequest,
    state: web::Data<ApiState>,
) -> Result<HttpResponse, actix_web::Error> {
    let request_url = {
        let info = req.connection_info();
        format!("{}://{}{}", info.scheme(), info.host(), req.uri())
    };
    let links = state.publisher.links(&request_url, None);

    let page = TOPIC_PAGE
        .replace("{self_link}", &links.self_link())
        .replace("{hub_link}", &links.hub_link())
        .replace("{rendered_at}", &Utc::now().to_rfc3339());

    let mut response = HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(page);
    Publisher::apply(&links, &mut response).map_err(api_error)?;
    Ok(response)
}

// ============================================================================
// Subscription Handlers
// ============================================================================

/// Subscriber-side subscription as exposed by the API; the secret stays private
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub callback_id: String,
    pub callback_url: String,
    pub topic_url: String,
    pub hub_url: String,
    pub state: SubscriptionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<u64>,
    pub expiration_time: DateTime<Utc>,
    pub signed: bool,
}

impl SubscriptionView {
    fn new(subscriber: &SubscriberService, callback_id: String, sub: SubscriberSubscription) -> Self {
        Self {
            callback_url: subscriber.callback_url(&callback_id),
            callback_id,
            state: sub.state(),
            topic_url: sub.topic_url,
            hub_url: sub.hub_url,
            lease_seconds: sub.lease_seconds,
            expiration_time: sub.expiration_time,
            signed: sub.secret.is_some(),
        }
    }
}

/// Subscribe either to a resource URL (discovering its hub) or to an
/// explicit topic and hub
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub url: Option<String>,
    pub topic_url: Option<String>,
    pub hub_url: Option<String>,
    pub lease_seconds: Option<i64>,
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatedSubscription {
    callback_id: String,
    topic_url: String,
    hub_url: String,
}

async fn list_subscriptions(
    state: web::Data<ApiState>,
) -> Result<HttpResponse, actix_web::Error> {
    let views: Vec<SubscriptionView> = state
        .subscriber
        .subscriptions()
        .map_err(api_error)?
        .into_iter()
        .map(|(id, sub)| SubscriptionView::new(&state.subscriber, id, sub))
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(views)))
}

async fn create_subscription(
    state: web::Data<ApiState>,
    body: web::Json<CreateSubscriptionRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let req = body.into_inner();
    let (topic_url, hub_url) = match (req.url, req.topic_url, req.hub_url) {
        (Some(url), _, _) => {
            let found = state.subscriber.discover(&url).await.map_err(api_error)?;
            (found.topic_url, found.hub_url)
        }
        (None, Some(topic_url), Some(hub_url)) => (topic_url, hub_url),
        _ => {
            return Err(api_error(WebSubError::validation(
                "Either url or both topic_url and hub_url are required",
            )))
        }
    };

    let callback_id = state
        .subscriber
        .subscribe(&topic_url, &hub_url, req.lease_seconds, req.secret)
        .await
        .map_err(api_error)?;

    Ok(HttpResponse::Accepted().json(ApiResponse::success(CreatedSubscription {
        callback_id,
        topic_url,
        hub_url,
    })))
}

async fn get_subscription(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let callback_id = path.into_inner();
    let sub = state
        .subscriber
        .subscription(&callback_id)
        .and_then(|sub| sub.ok_or_else(|| WebSubError::not_found("subscription", &callback_id)))
        .map_err(api_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(SubscriptionView::new(
        &state.subscriber,
        callback_id,
        sub,
    ))))
}

async fn delete_subscription(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    state
        .subscriber
        .unsubscribe(&path.into_inner())
        .await
        .map_err(api_error)?;

    Ok(HttpResponse::Accepted().finish())
}

async fn renew_subscription(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    state
        .subscriber
        .renew(&path.into_inner())
        .await
        .map_err(api_error)?;

    Ok(HttpResponse::Accepted().finish())
}

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    pub margin_seconds: Option<u64>,
}

async fn sweep_subscriptions(
    state: web::Data<ApiState>,
    query: web::Query<SweepQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let margin = query
        .margin_seconds
        .unwrap_or(state.subscriber.settings().renew_margin_sec);
    let report = state
        .subscriber
        .renew_close_to_expiration(margin)
        .await
        .map_err(api_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

// ============================================================================
// Hub Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub topic_url: String,
}

async fn notify_topic(
    state: web::Data<ApiState>,
    body: web::Json<NotifyRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let report = state
        .hub
        .send_change_notification(&body.topic_url, None)
        .await
        .map_err(api_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

async fn cleanup_hub(state: web::Data<ApiState>) -> Result<HttpResponse, actix_web::Error> {
    let removed = state
        .hub
        .cleanup_expired_subscriptions()
        .map_err(api_error)?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "removed": removed }))))
}
