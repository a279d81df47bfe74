use super::protocol as ws_protocol;
use super::registry::RoomRegistry;
use super::session::Session;
use crate::auth::{token::authenticate, JwtCredentialVerifier, Principal};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};
use crate::metrics;
use crate::store::{AccessDecision, DocumentStore};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use coedit_common::{
    protocol::ws::{ClientEvent, ServerEvent},
    types::ChatEvent,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct RelayState {
    pub verifier: Arc<JwtCredentialVerifier>,
    pub store: DocumentStore,
    pub registry: RoomRegistry,
    pub max_frame_bytes: usize,
}

/// Upgrade query string. The field name is the protocol's
/// `TOKEN_QUERY_PARAM`.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// Why a join request ended the connection. The display text is sent to
/// the client verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Document not found")]
    NotFound,
    #[error("Access denied")]
    AccessDenied,
    #[error("internal server error")]
    StoreUnavailable,
}

impl JoinError {
    fn to_event(self) -> ServerEvent {
        ServerEvent::error(self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EventOutcome {
    Continue,
    Terminate(ServerEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChatOutcome {
    pub delivered: usize,
    pub persisted: bool,
}

pub fn router(state: RelayState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(
    State(state): State<RelayState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let request_id =
        current_request_id().unwrap_or_else(|| request_id_from_headers_or_generate(&headers));
    let principal = match authenticate(&state.verifier, params.token.as_deref(), &headers) {
        Ok(principal) => principal,
        Err(auth_error) => {
            metrics::record_connection("rejected_auth");
            warn!(request_id = %request_id, reason = %auth_error, "websocket upgrade rejected");
            return RelayError::new(ErrorCode::AuthInvalidToken, auth_error.to_string())
                .with_request_id(request_id)
                .into_response();
        }
    };

    let max_frame_bytes = state.max_frame_bytes;
    ws.max_frame_size(max_frame_bytes)
        .max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, principal, socket)).await;
        })
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket, max_frame_bytes: usize) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: format!("websocket frame exceeds maximum size of {max_frame_bytes} bytes")
                .into(),
        })))
        .await;
}

async fn handle_socket(state: RelayState, principal: Principal, mut socket: WebSocket) {
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    let mut session = Session::new(principal, outbound_sender);
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    metrics::record_connection("accepted");
    info!(
        connection_id = %session.id(),
        user_id = %session.principal().user_id,
        request_id = %request_id,
        "websocket connected"
    );

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                let Some(outbound_event) = maybe_outbound else {
                    break;
                };
                if ws_protocol::send_event(&mut socket, &outbound_event).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        let inbound = match ws_protocol::decode_client_event(&raw_message) {
                            Ok(event) => event,
                            Err(decode_error) => {
                                debug!(
                                    connection_id = %session.id(),
                                    error = %decode_error,
                                    "dropping malformed websocket event"
                                );
                                continue;
                            }
                        };

                        if let EventOutcome::Terminate(error_event) =
                            dispatch_event(&state, &mut session, inbound).await
                        {
                            metrics::record_connection("rejected_join");
                            let _ = ws_protocol::send_event(&mut socket, &error_event).await;
                            let _ = socket.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    // Pings are answered by the transport; binary frames carry no events.
                    Ok(_) => {}
                    Err(error) if is_frame_size_violation(&error) => {
                        warn!(connection_id = %session.id(), "websocket frame too large, closing");
                        close_frame_too_large(&mut socket, state.max_frame_bytes).await;
                        break;
                    }
                    Err(error) => {
                        debug!(connection_id = %session.id(), error = %error, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    if let Some(document_id) = session.room() {
        state.registry.leave(document_id, session.id()).await;
    }
    info!(
        connection_id = %session.id(),
        user_id = %session.principal().user_id,
        room_id = ?session.room(),
        "websocket disconnected"
    );
}

/// Route one decoded event according to the session's state.
pub(crate) async fn dispatch_event(
    state: &RelayState,
    session: &mut Session,
    event: ClientEvent,
) -> EventOutcome {
    let started_at = Instant::now();

    match (session.room(), event) {
        (None, ClientEvent::JoinRoom { room_id }) => {
            let result = handle_join_room(&state.store, &state.registry, session, &room_id).await;
            metrics::record_ws_event(
                "join_room",
                result.is_err(),
                started_at.elapsed().as_millis() as u64,
            );
            match result {
                Ok(_) => EventOutcome::Continue,
                Err(join_error) => {
                    info!(
                        connection_id = %session.id(),
                        user_id = %session.principal().user_id,
                        room_id = %room_id,
                        reason = %join_error,
                        "join rejected"
                    );
                    EventOutcome::Terminate(join_error.to_event())
                }
            }
        }
        (Some(document_id), ClientEvent::JoinRoom { .. }) => {
            debug!(
                connection_id = %session.id(),
                room_id = %document_id,
                "ignoring join-room on a joined connection"
            );
            EventOutcome::Continue
        }
        (None, _) => {
            debug!(connection_id = %session.id(), "ignoring event before join");
            EventOutcome::Continue
        }
        (Some(document_id), ClientEvent::ContentChange { content }) => {
            handle_content_change(&state.registry, session, document_id, content).await;
            metrics::record_ws_event(
                "content_change",
                false,
                started_at.elapsed().as_millis() as u64,
            );
            EventOutcome::Continue
        }
        (Some(document_id), ClientEvent::ChatMessage { message }) => {
            let outcome = handle_chat_message(
                &state.store,
                &state.registry,
                session,
                document_id,
                message,
                Utc::now(),
            )
            .await;
            metrics::record_ws_event(
                "chat_message",
                !outcome.persisted,
                started_at.elapsed().as_millis() as u64,
            );
            EventOutcome::Continue
        }
    }
}

/// Check the session's principal against the document and, on success,
/// enter its room. The store lookup runs before the registry is touched.
pub(crate) async fn handle_join_room(
    store: &DocumentStore,
    registry: &RoomRegistry,
    session: &mut Session,
    room_id: &str,
) -> Result<Uuid, JoinError> {
    let user_id = session.principal().user_id;
    let decision = store.resolve_access(room_id, user_id).await.map_err(|store_error| {
        error!(
            connection_id = %session.id(),
            user_id = %user_id,
            room_id = %room_id,
            error = ?store_error,
            "document access lookup failed"
        );
        JoinError::StoreUnavailable
    })?;

    match decision {
        AccessDecision::NotFound => Err(JoinError::NotFound),
        AccessDecision::Denied => Err(JoinError::AccessDenied),
        AccessDecision::Granted { document_id, access } => {
            registry.join(document_id, session.handle()).await;
            session.mark_joined(document_id);
            info!(
                connection_id = %session.id(),
                user_id = %user_id,
                room_id = %document_id,
                access = ?access,
                "joined room"
            );
            Ok(document_id)
        }
    }
}

/// Forward a content snapshot to every other member of the room.
pub(crate) async fn handle_content_change(
    registry: &RoomRegistry,
    session: &Session,
    document_id: Uuid,
    content: Value,
) -> usize {
    registry
        .broadcast(document_id, &ServerEvent::ContentChange { content }, Some(session.id()))
        .await
}

/// Broadcast a chat line to the whole room, sender included, then append
/// it to the document's history. A failed append is logged and counted;
/// the broadcast stands.
pub(crate) async fn handle_chat_message(
    store: &DocumentStore,
    registry: &RoomRegistry,
    session: &Session,
    document_id: Uuid,
    message: String,
    now: DateTime<Utc>,
) -> ChatOutcome {
    let chat_event = ChatEvent::new(session.principal().username.clone(), message, now);
    let delivered = registry
        .broadcast(document_id, &ServerEvent::ChatMessage(chat_event.clone()), None)
        .await;

    let persisted = match store.append_message(document_id, &chat_event).await {
        Ok(()) => true,
        Err(persist_error) => {
            error!(
                connection_id = %session.id(),
                room_id = %document_id,
                error = ?persist_error,
                "failed to persist chat message"
            );
            metrics::increment_chat_persist_failures();
            false
        }
    };

    ChatOutcome { delivered, persisted }
}
