use coedit_common::protocol::ws::ServerEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Principal;

pub type SessionId = Uuid;
pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined(Uuid),
}

/// One authenticated connection. Owned by its connection task.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    principal: Principal,
    state: SessionState,
    outbound: OutboundSender,
}

impl Session {
    pub fn new(principal: Principal, outbound: OutboundSender) -> Self {
        Self { id: Uuid::new_v4(), principal, state: SessionState::Unjoined, outbound }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Document whose room this session belongs to, once joined.
    pub fn room(&self) -> Option<Uuid> {
        match self.state {
            SessionState::Unjoined => None,
            SessionState::Joined(document_id) => Some(document_id),
        }
    }

    pub(crate) fn mark_joined(&mut self, document_id: Uuid) {
        self.state = SessionState::Joined(document_id);
    }

    /// Handle placed in the room registry so peers can reach this session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.id,
            user_id: self.principal.user_id,
            outbound: self.outbound.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub user_id: Uuid,
    outbound: OutboundSender,
}

impl SessionHandle {
    /// Queue `event` for the session's connection task. Returns false when
    /// the connection is gone.
    pub(crate) fn deliver(&self, event: ServerEvent) -> bool {
        self.outbound.send(event).is_ok()
    }
}
