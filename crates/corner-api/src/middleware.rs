//! Bearer authentication for the REST surface.
//!
//! The identity collaborator's contract: decode the JWT, then re-read
//! the user row so the role reflects the store, not the credential.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use corner_types::api::{AuthUser, Claims};
use corner_types::models::Role;

use crate::AppState;
use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header, attach
/// the resolved `AuthUser` as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("invalid token".into()))?;

    let user_id = token_data.claims.sub;
    let db = state.db.clone();
    let row = tokio::task::spawn_blocking(move || db.get_user_auth(user_id))
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task join error: {e}")))?
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::Unauthorized("user not found".into()))?;

    let role = Role::parse(&row.role)
        .ok_or_else(|| ApiError::Internal(format!("corrupt role '{}' for user {}", row.role, row.id)))?;

    req.extensions_mut().insert(AuthUser { id: row.id, role });
    Ok(next.run(req).await)
}

/// Gate a role-scoped route: a valid credential with the wrong role is
/// insufficient permissions, not a missing resource.
pub fn require_role(user: &AuthUser, role: Role) -> Result<(), ApiError> {
    if user.role == role {
        Ok(())
    } else {
        Err(ApiError::Forbidden("insufficient permissions".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_gate_rejects_the_other_seat() {
        let coach = AuthUser { id: 9, role: Role::Coach };
        assert!(require_role(&coach, Role::Coach).is_ok());
        assert!(matches!(
            require_role(&coach, Role::Client),
            Err(ApiError::Forbidden(_))
        ));
    }
}
