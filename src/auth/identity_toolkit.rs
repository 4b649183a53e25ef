use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use hyper::{Method, Uri};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{AuthProvider, Session, SessionState, User};
use crate::{
    error::{AuthError, TransportError},
    protocols::https::{mk_form_request, mk_json_request, HyperHttpsClient},
    settings::FirebaseSettings,
};

/// Id tokens live for an hour; refresh comfortably before that.
const REFRESH_INTERVAL: Duration = Duration::from_secs(50 * 60);

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    id_token: String,
    email: String,
    refresh_token: String,
    local_id: String,
}

#[derive(Deserialize, Debug)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    message: String,
}

/// Maps an Identity Toolkit error message such as `EMAIL_EXISTS` or
/// `WEAK_PASSWORD : Password should be at least 6 characters`.
pub fn map_identity_error(message: &str) -> AuthError {
    let (code, detail) = match message.split_once(':') {
        Some((code, detail)) => (code.trim(), detail.trim()),
        None => (message.trim(), ""),
    };

    match code {
        "EMAIL_EXISTS" => AuthError::EmailInUse,
        "WEAK_PASSWORD" => AuthError::WeakPassword(detail.to_string()),
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL"
        | "USER_DISABLED" | "MISSING_PASSWORD" => AuthError::InvalidCredentials,
        _ => AuthError::Unexpected(message.to_string()),
    }
}

fn map_transport_error(e: TransportError) -> AuthError {
    let body = match &e {
        TransportError::Status { body, .. } => serde_json::from_str::<ErrorBody>(body).ok(),
        _ => None,
    };

    match body {
        Some(body) => map_identity_error(&body.error.message),
        None => AuthError::Network(e),
    }
}

pub struct IdentityToolkitAuth {
    settings: FirebaseSettings,
    client: HyperHttpsClient,
    session: watch::Sender<SessionState>,
}

impl IdentityToolkitAuth {
    pub fn new(settings: &FirebaseSettings, client: &HyperHttpsClient) -> Self {
        let (session, _) = watch::channel(SessionState::SignedOut);

        IdentityToolkitAuth {
            settings: settings.clone(),
            client: client.clone(),
            session,
        }
    }

    fn account_uri(&self, action: &str) -> Result<Uri, TransportError> {
        Ok(format!(
            "{}/accounts:{}?key={}",
            self.settings.identity_url.trim_end_matches('/'),
            action,
            self.settings.api_key
        )
        .parse()?)
    }

    async fn password_request(&self, action: &str, email: &str, password: &str) -> Result<User, AuthError> {
        let uri = self.account_uri(action)?;
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };

        let response: PasswordResponse = mk_json_request(&self.client, Method::POST, &uri, &body)
            .await
            .map_err(map_transport_error)?;

        let user = User {
            email: response.email,
            id: response.local_id,
        };

        self.session.send_replace(SessionState::SignedIn(Session {
            user: user.clone(),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        }));

        info!("Signed in as {}", user.email);

        Ok(user)
    }

    /// Exchanges the refresh token for a new id token. Does nothing while
    /// signed out.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let current = self.session.borrow().clone();
        let SessionState::SignedIn(session) = current else {
            return Ok(());
        };

        let uri: Uri = format!("{}?key={}", self.settings.token_url, self.settings.api_key)
            .parse()
            .map_err(TransportError::from)?;

        let response: RefreshResponse = mk_form_request(
            &self.client,
            &uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", session.refresh_token.as_str()),
            ],
        )
        .await
        .map_err(map_transport_error)?;

        // A sign out may have raced the refresh
        self.session.send_if_modified(|state| match state {
            SessionState::SignedIn(current) if current.user.id == response.user_id => {
                current.id_token = response.id_token.clone();
                current.refresh_token = response.refresh_token.clone();
                true
            }
            _ => false,
        });

        Ok(())
    }
}

#[async_trait]
impl AuthProvider for IdentityToolkitAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        self.password_request("signUp", email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        self.password_request("signInWithPassword", email, password).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.send_replace(SessionState::SignedOut);
        info!("Signed out");

        Ok(())
    }

    fn observe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }
}

/// Periodically refreshes the id token of the current session.
pub fn start_token_refresh_loop(auth: &Arc<IdentityToolkitAuth>) {
    let auth = auth.clone();

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(REFRESH_INTERVAL).await;

            if let Err(e) = auth.refresh().await {
                warn!("Failed to refresh id token: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_error_codes() {
        assert_eq!(map_identity_error("EMAIL_EXISTS"), AuthError::EmailInUse);
        assert_eq!(
            map_identity_error("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthError::WeakPassword("Password should be at least 6 characters".to_string())
        );
        assert_eq!(
            map_identity_error("INVALID_LOGIN_CREDENTIALS"),
            AuthError::InvalidCredentials
        );
        assert_eq!(map_identity_error("EMAIL_NOT_FOUND"), AuthError::InvalidCredentials);
        assert!(matches!(
            map_identity_error("TOO_MANY_ATTEMPTS_TRY_LATER"),
            AuthError::Unexpected(_)
        ));
    }

    #[test]
    fn error_bodies_are_decoded() {
        let e = TransportError::Status {
            status: 400,
            body: r#"{"error":{"code":400,"message":"EMAIL_EXISTS","errors":[]}}"#.to_string(),
        };
        assert_eq!(map_transport_error(e), AuthError::EmailInUse);

        let e = TransportError::Status {
            status: 502,
            body: "<html>bad gateway</html>".to_string(),
        };
        assert!(matches!(map_transport_error(e), AuthError::Network(_)));
    }
}
