use crate::error::{AppError, AppResult};
use crate::models::{CreateMessageRequest, QueuedResponse};
use crate::state::AppState;
use crate::store::with_deadline;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use tracing::debug;
use validator::Validate;

const MAX_BODY_BYTES: usize = 16 * 1024;
const MAX_SNAPSHOT_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub limit: Option<i64>,
}

/// Body extractor config: any malformed body becomes the standard 400.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| {
            debug!(error = %err, "Rejected malformed message body");
            AppError::InvalidMessage.into()
        })
}

/// Queue a message. 202 means accepted for batching, not yet durable.
#[post("/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    body: web::Json<CreateMessageRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    request.validate().map_err(|e| {
        debug!(error = %e, "Rejected invalid message");
        AppError::InvalidMessage
    })?;

    state.writer.enqueue(request.content)?;

    Ok(HttpResponse::Accepted().json(QueuedResponse::queued()))
}

/// Snapshot read, newest first. Clients use it to catch up on missed events.
#[get("/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    query: web::Query<SnapshotQuery>,
) -> AppResult<HttpResponse> {
    let limit = query.limit.map(|n| n.clamp(1, MAX_SNAPSHOT_LIMIT));

    let messages = with_deadline(state.config.store_timeout, state.store.recent(limit))
        .await
        .map_err(AppError::FetchMessages)?;

    Ok(HttpResponse::Ok().json(messages))
}
