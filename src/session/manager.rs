use tracing::{debug, info, warn};

use super::client::{AuthApi, ClientError};
use super::storage::LocalStorage;
use super::{AUTH_TOKEN_KEY, USER_DATA_KEY};
use crate::auth::dto::{AuthResponse, RegisterRequest};
use crate::auth::repo_types::{Role, SafeUser};

/// `Unknown -> LoadingLocalState -> {LoggedOut, LoggedIn}`. After that,
/// logout always lands in `LoggedOut` and only a successful login leads
/// back to `LoggedIn`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unknown,
    LoadingLocalState,
    LoggedOut,
    LoggedIn { role: Role, user: SafeUser },
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionState::LoggedIn { .. })
    }

    pub fn user(&self) -> Option<&SafeUser> {
        match self {
            SessionState::LoggedIn { user, .. } => Some(user),
            _ => None,
        }
    }
}

pub struct SessionManager<S, A> {
    storage: S,
    api: A,
    state: SessionState,
}

impl<S: LocalStorage, A: AuthApi> SessionManager<S, A> {
    pub fn new(storage: S, api: A) -> Self {
        Self {
            storage,
            api,
            state: SessionState::Unknown,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn token(&self) -> Option<String> {
        self.storage.get(AUTH_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    /// Rebuilds the session from local storage. Never fails: a snapshot that
    /// does not parse is cleared and the session starts logged out.
    pub fn restore_session(&mut self) -> &SessionState {
        self.state = SessionState::LoadingLocalState;

        let token = self.token();
        let snapshot = self.storage.get(USER_DATA_KEY);
        self.state = match (token, snapshot) {
            (Some(_), Some(raw)) => match serde_json::from_str::<SafeUser>(&raw) {
                Ok(user) => {
                    debug!(user_id = %user.id, "session restored");
                    SessionState::LoggedIn {
                        role: user.role(),
                        user,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cached user data corrupt; clearing session");
                    self.clear_local();
                    SessionState::LoggedOut
                }
            },
            _ => SessionState::LoggedOut,
        };
        &self.state
    }

    /// Marks the session active. The token is expected to be stored already.
    pub fn login(&mut self, role: Role, user: SafeUser) {
        if user.role() != role {
            warn!(expected = %role, actual = %user.role(), "session role differs from user role");
        }
        self.state = SessionState::LoggedIn { role, user };
    }

    /// Authenticates against the service, persists the token and snapshot,
    /// then logs in. On failure the session is left as it was.
    pub async fn sign_in(
        &mut self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<SafeUser, ClientError> {
        let response = self.api.login(email, password, role).await?;
        Ok(self.accept(role, response))
    }

    /// Registers and logs in with the returned token.
    pub async fn sign_up(&mut self, request: &RegisterRequest) -> Result<SafeUser, ClientError> {
        let response = self.api.register(request).await?;
        let role = response.user.role();
        Ok(self.accept(role, response))
    }

    fn accept(&mut self, role: Role, response: AuthResponse) -> SafeUser {
        if let Err(e) = self.storage.set(AUTH_TOKEN_KEY, &response.token) {
            warn!(error = %e, "could not persist auth token");
        }
        self.store_snapshot(&response.user);
        info!(user_id = %response.user.id, %role, "signed in");
        self.login(role, response.user.clone());
        response.user
    }

    fn store_snapshot(&mut self, user: &SafeUser) {
        let stored = serde_json::to_string(user)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                self.storage
                    .set(USER_DATA_KEY, &raw)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = stored {
            warn!(error = %e, "could not persist user data");
        }
    }

    /// Tells the service, then clears local state whatever the outcome.
    pub async fn logout(&mut self) {
        if let Some(token) = self.token() {
            if let Err(e) = self.api.logout(&token).await {
                warn!(error = %e, "remote logout failed; clearing local session anyway");
            }
        }
        self.clear_local();
        self.state = SessionState::LoggedOut;
        info!("logged out");
    }

    /// Re-reads the current user. A rejected token ends the session; an
    /// unreachable service keeps the cached snapshot.
    pub async fn refresh_current_user(&mut self) -> Result<(), ClientError> {
        let Some(token) = self.token() else {
            self.state = SessionState::LoggedOut;
            return Ok(());
        };

        match self.api.me(&token).await {
            Ok(user) => {
                self.store_snapshot(&user);
                self.state = SessionState::LoggedIn {
                    role: user.role(),
                    user,
                };
                Ok(())
            }
            Err(e) if e.is_unauthorized() => {
                warn!("token rejected; clearing session");
                self.clear_local();
                self.state = SessionState::LoggedOut;
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "could not refresh user; keeping cached session");
                Err(e)
            }
        }
    }

    fn clear_local(&mut self) {
        for key in [AUTH_TOKEN_KEY, USER_DATA_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(error = %e, key, "could not clear session entry");
            }
        }
    }
}
