//! Authenticated session and role gating.
//!
//! [`AuthSession`] holds the current [`Session`] (user, role, token) and
//! broadcasts every change. Anything that needs a live session, most
//! importantly the hub connection and the background listener, follows
//! [`AuthSession::subscribe`] and rebuilds itself on login, token refresh
//! and logout.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Backend user identifier.
///
/// The backend serializes ids as numbers in some payloads and strings in
/// others; both normalize to the decimal string form.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Number(i64),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Text(s) => Self(s),
            Wire::Number(n) => Self(n.to_string()),
        })
    }
}

impl UserId {
    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Platform administrator.
    Admin,
    /// Pharmacy (seller/buyer) account.
    Pharmacy,
    /// Regular user.
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "Admin"),
            Self::Pharmacy => write!(f, "Pharmacy"),
            Self::User => write!(f, "User"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "pharmacy" => Ok(Self::Pharmacy),
            "user" => Ok(Self::User),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The logged-in user.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Who is logged in.
    pub user_id: UserId,
    /// Their role, if the backend assigned one.
    pub role: Option<Role>,
    /// Bearer token for REST and hub calls.
    pub token: String,
    /// Pharmacy the account acts for. Chat messages may carry this id as
    /// their sender instead of `user_id`.
    pub pharmacy_id: Option<UserId>,
    /// Login this session belongs to; set by [`AuthSession::login`] and
    /// kept across token refreshes.
    generation: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("pharmacy_id", &self.pharmacy_id)
            .field("token", &"[redacted]")
            .field("generation", &self.generation)
            .finish()
    }
}

impl Session {
    /// Create a session.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, role: Option<Role>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            token: token.into(),
            pharmacy_id: None,
            generation: 0,
        }
    }

    /// Attach the pharmacy id the account acts for.
    #[must_use]
    pub fn with_pharmacy_id(mut self, pharmacy_id: impl Into<UserId>) -> Self {
        self.pharmacy_id = Some(pharmacy_id.into());
        self
    }

    /// Whether `sender` is this account, by user id or pharmacy id.
    #[must_use]
    pub fn is_self(&self, sender: &UserId) -> bool {
        &self.user_id == sender || self.pharmacy_id.as_ref() == Some(sender)
    }

    /// Login counter value. Two sessions with the same generation come from
    /// the same login; a token refresh keeps it.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the session's role is one of `roles`. No role never matches.
    #[must_use]
    pub fn has_role(&self, roles: &[Role]) -> bool {
        self.role.is_some_and(|role| roles.contains(&role))
    }
}

/// Visibility rule for role-restricted UI.
///
/// With `not` unset, content is shown to sessions holding one of `roles`.
/// With `not` set, the rule is inverted: it hides content from those roles
/// and shows it to everyone else, including anonymous visitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGate {
    roles: Vec<Role>,
    not: bool,
}

impl RoleGate {
    /// Show only to `roles`.
    #[must_use]
    pub fn allow(roles: &[Role]) -> Self {
        Self {
            roles: roles.to_vec(),
            not: false,
        }
    }

    /// Hide from `roles`.
    #[must_use]
    pub fn deny(roles: &[Role]) -> Self {
        Self {
            roles: roles.to_vec(),
            not: true,
        }
    }

    /// Decide visibility for the current session (if any).
    #[must_use]
    pub fn allows(&self, session: Option<&Session>) -> bool {
        match session {
            Some(session) if session.role.is_some() => session.has_role(&self.roles) != self.not,
            _ => self.not,
        }
    }
}

/// Holder of the current session.
///
/// Cheap to share by reference; observers get a `watch` receiver that
/// always yields the latest session (or `None` when logged out).
#[derive(Debug)]
pub struct AuthSession {
    tx: watch::Sender<Option<Session>>,
    logins: AtomicU64,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    /// Start logged out.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            logins: AtomicU64::new(0),
        }
    }

    /// Replace the current session.
    ///
    /// Every login gets a fresh [`Session::generation`], even for the same
    /// user, so observers can tell a new login from a token refresh.
    pub fn login(&self, mut session: Session) {
        session.generation = self.logins.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!(
            "[Session] Logged in as {} ({})",
            session.user_id,
            session
                .role
                .map_or_else(|| "no role".to_string(), |r| r.to_string())
        );
        self.tx.send_replace(Some(session));
    }

    /// Drop the current session.
    pub fn logout(&self) {
        if self.tx.send_replace(None).is_some() {
            log::info!("[Session] Logged out");
        }
    }

    /// Swap the bearer token, keeping identity and role.
    ///
    /// Returns `false` when nobody is logged in.
    pub fn refresh_token(&self, token: impl Into<String>) -> bool {
        let token = token.into();
        self.tx.send_if_modified(|current| match current {
            Some(session) if session.token != token => {
                session.token = token;
                log::info!("[Session] Token refreshed for {}", session.user_id);
                true
            }
            _ => false,
        })
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    /// Whether someone is logged in.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Receiver notified on login, token refresh and logout.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}
