use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::sse::{AdminHandshake, ServerEvent, SystemStatus},
    error::ServiceError,
    state::SharedState,
};

const EVENT_ADMIN_TOKEN: &str = "admin_token";
const EVENT_SYSTEM_STATUS: &str = "system.status";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Stream whose teardown needs bookkeeping.
#[derive(Clone)]
pub enum StreamKind {
    Public,
    /// Releases the admin token once the client is gone.
    Admin(SharedState),
}

/// Subscribe to the public stream. The first event reports the degraded flag.
pub fn subscribe_public(state: &SharedState) -> (broadcast::Receiver<ServerEvent>, Vec<ServerEvent>) {
    let receiver = state.public_sse().subscribe();
    let greeting = status_event(state).into_iter().collect();
    (receiver, greeting)
}

/// Claim the single admin slot and subscribe to the admin stream.
///
/// The first events carry the issued token and the degraded flag.
pub async fn subscribe_admin(
    state: &SharedState,
) -> Result<(broadcast::Receiver<ServerEvent>, Vec<ServerEvent>), ServiceError> {
    let token = claim_admin_token(state).await?;
    let receiver = state.admin_sse().subscribe();

    let mut greeting = Vec::with_capacity(2);
    match ServerEvent::json(Some(EVENT_ADMIN_TOKEN.to_string()), &AdminHandshake { token }) {
        Ok(event) => greeting.push(event),
        Err(err) => {
            reset_admin_token(state.clone()).await;
            return Err(ServiceError::InvalidState(format!(
                "failed to encode admin handshake: {err}"
            )));
        }
    }
    greeting.extend(status_event(state));
    Ok((receiver, greeting))
}

/// Convert a broadcast receiver into an SSE response. `greeting` is sent first,
/// then every broadcast event until the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    greeting: Vec<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);

    tokio::spawn(async move {
        let mut open = true;
        for payload in greeting {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                open = false;
                break;
            }
        }

        while open {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "SSE subscriber lagging; events dropped");
                        }
                    }
                }
            }
        }

        match kind {
            StreamKind::Public => info!("public SSE stream disconnected"),
            StreamKind::Admin(state) => {
                reset_admin_token(state).await;
                info!("admin SSE stream disconnected");
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

fn status_event(state: &SharedState) -> Option<ServerEvent> {
    ServerEvent::json(
        Some(EVENT_SYSTEM_STATUS.to_string()),
        &SystemStatus {
            degraded: state.is_degraded(),
        },
    )
    .ok()
}

/// Reserve the admin token for a new stream, failing if another connection holds it.
async fn claim_admin_token(state: &SharedState) -> Result<String, ServiceError> {
    let mut guard = state.admin_token().lock().await;
    if guard.is_some() {
        return Err(ServiceError::Unauthorized(
            "another admin SSE stream is already active".into(),
        ));
    }
    let token = Uuid::new_v4().simple().to_string();
    *guard = Some(token.clone());
    Ok(token)
}

/// Clear the stored admin token so the next admin connection gets a fresh one.
async fn reset_admin_token(state: SharedState) {
    let mut guard = state.admin_token().lock().await;
    guard.take();
}
