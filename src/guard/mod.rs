//! Route guard state machine.
//!
//! A guard starts in [`GuardState::Loading`] while the caller's session is being
//! restored, then settles exactly once into one of the terminal states. Every
//! terminal state other than [`GuardState::Authorized`] carries a fixed redirect
//! target for the web client. The same machine backs the `/api/auth/guard`
//! endpoint and server-side authorization in handlers.

use serde::Serialize;

use crate::db::Role;

pub const LOGIN_PATH: &str = "/login";
pub const VERIFY_EMAIL_PATH: &str = "/verify-email";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    Loading,
    Unauthenticated,
    Unconfirmed,
    WrongRole,
    Authorized,
}

impl GuardState {
    pub fn redirect(&self) -> Option<&'static str> {
        match self {
            GuardState::Loading | GuardState::Authorized => None,
            GuardState::Unauthenticated => Some(LOGIN_PATH),
            GuardState::Unconfirmed => Some(VERIFY_EMAIL_PATH),
            GuardState::WrongRole => Some(UNAUTHORIZED_PATH),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, GuardState::Loading)
    }
}

/// What the session lookup found for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub role: Role,
    pub email_confirmed: bool,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    required_role: Option<Role>,
    require_confirmation: bool,
    state: GuardState,
}

impl RouteGuard {
    pub fn new(required_role: Option<Role>, require_confirmation: bool) -> Self {
        Self {
            required_role,
            require_confirmation,
            state: GuardState::Loading,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Settle the guard with the session lookup result. Later calls are ignored.
    pub fn resolve(&mut self, outcome: Option<SessionOutcome>) -> GuardState {
        if self.state.is_resolved() {
            return self.state;
        }

        self.state = match outcome {
            None => GuardState::Unauthenticated,
            Some(session) if !session.active => GuardState::Unauthenticated,
            Some(session) if self.require_confirmation && !session.email_confirmed => {
                GuardState::Unconfirmed
            }
            Some(session) => match self.required_role {
                Some(required) if required != session.role => GuardState::WrongRole,
                _ => GuardState::Authorized,
            },
        };
        self.state
    }

    pub fn decision(&self) -> GuardDecision {
        GuardDecision {
            state: self.state,
            redirect: self.state.redirect(),
        }
    }
}

/// Evaluate a fresh guard in one step
pub fn evaluate(
    required_role: Option<Role>,
    require_confirmation: bool,
    outcome: Option<SessionOutcome>,
) -> GuardDecision {
    let mut guard = RouteGuard::new(required_role, require_confirmation);
    guard.resolve(outcome);
    guard.decision()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    pub state: GuardState,
    pub redirect: Option<&'static str>,
}
