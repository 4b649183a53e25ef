use std::fmt;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::AuthError;

pub mod identity_toolkit;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub id: String,
}

/// A signed in user together with the tokens that authorize database access.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user: User,
    pub id_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("id_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    SignedOut,
    SignedIn(Session),
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::SignedIn(session) => Some(&session.user),
            SessionState::SignedOut => None,
        }
    }

    pub fn id_token(&self) -> Option<String> {
        match self {
            SessionState::SignedIn(session) => Some(session.id_token.clone()),
            SessionState::SignedOut => None,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Current session state, updated on every sign in, sign out and token
    /// refresh.
    fn observe_session(&self) -> watch::Receiver<SessionState>;
}
