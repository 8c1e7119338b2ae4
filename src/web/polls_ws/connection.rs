//! WebSocket connection actor for live poll viewers

use crate::app_config::RealtimeConfig;
use crate::notifier::{PollEvent, Subscription};
use actix::*;
use actix_web_actors::ws;
use std::time::{Duration, Instant};

/// Represents a single live poll WebSocket connection
pub struct PollSocket {
    /// Subscription ID (assigned by the notifier)
    pub id: usize,
    /// Handed to the context on start; dropped with the context on stop
    subscription: Option<Subscription>,
    /// Last heartbeat timestamp
    pub hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl PollSocket {
    pub fn new(subscription: Subscription, config: &RealtimeConfig) -> Self {
        Self {
            id: subscription.id(),
            subscription: Some(subscription),
            hb: Instant::now(),
            heartbeat_interval: config.heartbeat_interval(),
            client_timeout: config.client_timeout(),
        }
    }

    /// Start heartbeat process
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                log::debug!("Poll socket {} timed out", act.id);
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }
}

impl Actor for PollSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        if let Some(subscription) = self.subscription.take() {
            ctx.add_stream(subscription);
        }
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        log::debug!("Poll socket {} closed", self.id);
    }
}

/// Push notifier events to the client
impl StreamHandler<PollEvent> for PollSocket {
    fn handle(&mut self, event: PollEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(text) => ctx.text(text),
            Err(e) => log::warn!("Failed to serialize poll event: {}", e),
        }
    }

    /// The notifier dropped this subscription; ask the client to reconnect.
    fn finished(&mut self, ctx: &mut Self::Context) {
        log::debug!("Subscription {} ended, closing socket", self.id);
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Again,
            description: Some("subscription lost, reconnect".to_string()),
        }));
        ctx.stop();
    }
}

/// Handle incoming WebSocket messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PollSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Err(_) => {
                ctx.stop();
                return;
            }
            Ok(msg) => msg,
        };

        match msg {
            ws::Message::Ping(data) => {
                self.hb = Instant::now();
                ctx.pong(&data);
            }
            ws::Message::Pong(_) => {
                self.hb = Instant::now();
            }
            ws::Message::Text(text) => {
                self.hb = Instant::now();
                if text.trim() == "ping" {
                    ctx.text(r#"{"type":"pong"}"#);
                }
                // Updates are server-push only
            }
            ws::Message::Binary(_) => (),
            ws::Message::Close(reason) => {
                log::debug!("Poll socket {} client closing: {:?}", self.id, reason);
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                ctx.stop();
            }
            ws::Message::Nop => (),
        }
    }
}
