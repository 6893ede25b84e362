use crate::{
    config::Config, services::BatchWriter, store::MessageStore, websocket::ConnectionRegistry,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub writer: BatchWriter,
    pub registry: ConnectionRegistry,
    pub config: Arc<Config>,
}
