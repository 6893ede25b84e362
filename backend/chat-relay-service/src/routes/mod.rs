pub mod messages;
pub mod wsroute;

use crate::metrics;
use actix_web::web;

/// Register every relay endpoint. Shared by the binary and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(messages::json_config())
        .service(messages::send_message)
        .service(messages::get_messages)
        .route("/ws", web::get().to(wsroute::ws_handler))
        .route("/", web::get().to(wsroute::ws_handler))
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics::metrics_handler));
}
