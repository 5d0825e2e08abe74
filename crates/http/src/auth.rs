//! Resolves an [`Identity`] from ambient request headers, never from the
//! request body, then hands it to the Access Guard. A bot authenticates
//! with a shared secret compared in constant time; an operator authenticates
//! with a caller-asserted user id header. In a real deployment this header
//! would be populated by a trusted reverse proxy terminating session auth or
//! a verified JWT — that boundary sits outside this crate's scope.

use axum::http::HeaderMap;
use ledger_access::Identity;
use ledger_core::{AuthContext, CoreError, CoreResult, Role, Scope, UserId};

use crate::state::AppState;

const BOT_SECRET_HEADER: &str = "x-bot-secret";
const USER_ID_HEADER: &str = "x-user-id";

/// Constant-time byte comparison so a shared-secret check can't leak how
/// many leading bytes matched through response timing.
fn secrets_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn identity_from_headers(headers: &HeaderMap, config: &ledger_core::RuntimeConfig) -> CoreResult<Identity> {
    if let Some(secret) = headers.get(BOT_SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        if !config.bot_shared_secret.is_empty() && secrets_match(secret, &config.bot_shared_secret) {
            return Ok(Identity::Bot);
        }
        return Err(CoreError::Unauthenticated);
    }
    if let Some(raw) = headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()) {
        let user_id: uuid::Uuid = raw.parse().map_err(|_| CoreError::Unauthenticated)?;
        return Ok(Identity::Operator(UserId::from_uuid(user_id)));
    }
    Err(CoreError::Unauthenticated)
}

/// Resolves the caller's [`AuthContext`] for `scope`. Used by every handler
/// except `init_project`, which has no membership row to resolve against yet.
pub async fn resolve_scoped(state: &AppState, headers: &HeaderMap, scope: Scope) -> CoreResult<AuthContext> {
    let identity = identity_from_headers(headers, &state.config)?;
    ledger_access::resolve(state.members.as_ref(), scope, identity).await
}

/// Resolves only the calling operator's user id, for `init_project` where no
/// project (and therefore no membership) yet exists to resolve a role
/// against.
pub fn resolve_operator(state: &AppState, headers: &HeaderMap) -> CoreResult<UserId> {
    match identity_from_headers(headers, &state.config)? {
        Identity::Operator(user_id) => Ok(user_id),
        Identity::Bot => Err(CoreError::InsufficientPermissions {
            required: vec![Role::Owner, Role::Operator, Role::Viewer],
            actual: Role::Bot,
        }),
    }
}
