//! Caller identity and the anonymous quota gate.

use std::fmt;

use uuid::Uuid;

use crate::error::AppError;
use crate::feature::Feature;
use crate::store::{HistoryStore, SessionStore};

/// Cookie carrying the anonymous token.
pub const ANON_COOKIE: &str = "anon-id";
pub const ANON_COOKIE_MAX_AGE_DAYS: i64 = 30;
pub const DEFAULT_ANON_LIMIT: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque per-browser token. Carries no state beyond grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnonId(String);

impl AnonId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Owner of an operation: a signed-in user or an anonymous token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(UserId),
    Anonymous(AnonId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    /// True when the anonymous token was created for this request and must
    /// be handed back as a cookie.
    pub minted: bool,
}

impl ResolvedIdentity {
    pub fn minted_token(&self) -> Option<&AnonId> {
        match &self.identity {
            Identity::Anonymous(anon) if self.minted => Some(anon),
            _ => None,
        }
    }
}

/// Look the bearer token up, if any. Lookup failures are logged and treated
/// as "not signed in".
pub async fn authenticate(sessions: &dyn SessionStore, bearer: Option<&str>) -> Option<UserId> {
    let token = bearer.map(str::trim).filter(|t| !t.is_empty())?;
    match sessions.user_for_token(token).await {
        Ok(user) => user,
        Err(err) => {
            tracing::warn!(error = %err, "session lookup failed");
            None
        }
    }
}

pub async fn resolve_identity(
    sessions: &dyn SessionStore,
    bearer: Option<&str>,
    anon_cookie: Option<&str>,
) -> ResolvedIdentity {
    if let Some(user) = authenticate(sessions, bearer).await {
        return ResolvedIdentity {
            identity: Identity::User(user),
            minted: false,
        };
    }

    match anon_cookie.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => ResolvedIdentity {
            identity: Identity::Anonymous(AnonId::new(token)),
            minted: false,
        },
        None => ResolvedIdentity {
            identity: Identity::Anonymous(AnonId::mint()),
            minted: true,
        },
    }
}

pub async fn require_user(
    sessions: &dyn SessionStore,
    bearer: Option<&str>,
) -> Result<UserId, AppError> {
    authenticate(sessions, bearer)
        .await
        .ok_or(AppError::Unauthorized)
}

/// Reject an anonymous caller that already used `limit` operations of this
/// feature. Users are never limited.
pub async fn check_quota(
    history: &dyn HistoryStore,
    feature: Feature,
    identity: &Identity,
    limit: u64,
) -> Result<(), AppError> {
    let Identity::Anonymous(anon) = identity else {
        return Ok(());
    };
    let used = history.count_for_anon(feature, anon).await?;
    if used >= limit {
        tracing::info!(%feature, used, limit, "anonymous quota exhausted");
        return Err(AppError::QuotaExceeded(feature.quota_message().to_owned()));
    }
    Ok(())
}
