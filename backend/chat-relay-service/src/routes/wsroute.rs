use crate::state::AppState;
use crate::websocket::{ConnectionRegistry, SubscriberId};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use tokio_stream::wrappers::ReceiverStream;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// WebSocket Actor
struct WsSession {
    subscriber_id: SubscriberId,
    registry: ConnectionRegistry,
    outbound: Option<Receiver<String>>,
    hb: Instant,
}

impl WsSession {
    fn new(
        subscriber_id: SubscriberId,
        registry: ConnectionRegistry,
        outbound: Receiver<String>,
    ) -> Self {
        Self {
            subscriber_id,
            registry,
            outbound: Some(outbound),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(subscriber_id = %act.subscriber_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(subscriber_id = %self.subscriber_id, "WebSocket session started");

        self.hb(ctx);

        // Frames from the broadcast hub
        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(ReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(subscriber_id = %self.subscriber_id, "WebSocket session stopped");

        let registry = self.registry.clone();
        let subscriber_id = self.subscriber_id;
        actix::spawn(async move {
            registry.remove_subscriber(subscriber_id).await;
        });
    }
}

// Serialized events pushed by the hub
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // hub dropped our sender
        ctx.stop();
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                // push-only channel
                self.hb = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(subscriber_id = %self.subscriber_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Push-channel upgrade. Served at `/ws` and at `/`.
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (subscriber_id, rx) = state.registry.add_subscriber().await;
    let session = WsSession::new(subscriber_id, state.registry.clone(), rx);

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // handshake rejected, the actor never started
            state.registry.remove_subscriber(subscriber_id).await;
            Err(e)
        }
    }
}
