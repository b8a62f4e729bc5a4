use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::user::{Identity, Role};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    pub fn into_identity(self) -> Result<Identity> {
        let user_id = Uuid::parse_str(&self.sub)
            .map_err(|_| Error::Unauthorized("Token subject is not a user id".to_string()))?;
        let role: Role = self
            .role
            .as_deref()
            .ok_or_else(|| Error::Unauthorized("Token carries no role".to_string()))?
            .parse()
            .map_err(Error::Unauthorized)?;
        Ok(Identity::new(user_id, role))
    }
}

pub fn decode_identity(token: &str, secret: &str) -> Result<Identity> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| Error::Unauthorized("Invalid or expired token".to_string()))?;
    data.claims.into_identity()
}

/// Signs an HS256 token for `identity`, valid for `ttl_secs`.
pub fn issue_token(identity: &Identity, secret: &str, ttl_secs: i64) -> Result<String> {
    let role = match identity.role {
        Role::Student => "student",
        Role::Teacher => "teacher",
        Role::Admin => "admin",
    };
    let claims = Claims {
        sub: identity.user_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + ttl_secs).max(0) as usize,
        role: Some(role.to_string()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
}

pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| Error::Unauthorized("Missing authorization header".to_string()))?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| Error::Unauthorized("Malformed authorization header".to_string()))?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::Unauthorized("Unsupported authorization scheme".to_string()))?;

    let identity = decode_identity(token, &state.jwt_secret)?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
