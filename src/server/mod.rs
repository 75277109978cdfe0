pub mod hub;
pub mod page;
pub mod session;

use std::future::{self, Future};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{Html, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;

use crate::config::SessionConfig;
use crate::error::HubError;
use crate::protocol::Incoming;
use hub::Hub;
use session::Session;

/// Server exposes the hub over HTTP: the landing page at `/` and one
/// WebSocket per client at `/ws/{client_name}`.
#[derive(Clone)]
pub struct Server {
    hub: Hub,
    location: Arc<str>,
    session: SessionConfig,
}

impl Server {
    pub fn new(hub: Hub, location: &str, session: SessionConfig) -> Self {
        Self {
            hub,
            location: Arc::from(location),
            session,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/ws/{client_name}", get(upgrade))
            .with_state(self.clone())
    }

    pub async fn listen_and_serve(
        self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, location = %self.location, "listening");
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn index(State(server): State<Server>) -> Html<String> {
    Html(page::render(&server.location))
}

async fn upgrade(
    State(server): State<Server>,
    Path(client_name): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(name = %client_name, "websocket upgrade");
    ws.on_upgrade(move |socket| serve_socket(server, client_name, socket))
}

async fn serve_socket(server: Server, name: String, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let reader = stream.filter_map(|msg| future::ready(classify(msg)));
    let writer = sink.with(|line: Arc<str>| {
        future::ready(Ok::<_, axum::Error>(Message::Text(line.to_string().into())))
    });

    let session = Session::new(server.hub.clone(), name);
    let id = session.id();
    match session.run(reader, writer, &server.session).await {
        Ok(()) => tracing::debug!(conn = %id, "connection closed"),
        Err(HubError::Closed) => tracing::debug!(conn = %id, "connection closed by shutdown"),
        Err(e) => tracing::warn!(conn = %id, error = %e, "connection ended with error"),
    }
}

/// Map a raw WebSocket read onto the hub's view of a client channel.
/// Binary and ping/pong frames carry no chat text and are skipped.
fn classify(msg: Result<Message, axum::Error>) -> Option<Incoming> {
    match msg {
        Ok(Message::Text(text)) => Some(Incoming::Message(text.as_str().to_owned())),
        Ok(Message::Close(_)) => Some(Incoming::Closed),
        Ok(_) => None,
        Err(e) => Some(Incoming::Error(e.to_string())),
    }
}
