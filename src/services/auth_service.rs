use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::db::AccountStore;
use crate::error::{AppError, AppResult};
use crate::middleware::authenticated_user;
use crate::models::{normalize_email, UserModel};
use crate::proto::auth::auth_service_server::AuthService;
use crate::proto::auth::{
    LoginRequest, LoginResponse, LogoutResponse, RefreshTokenRequest, RefreshTokenResponse,
};
use crate::proto::common::Empty;

const NO_ACTIVE_ACCOUNT: &str = "No active account found with the given credentials";
const INVALID_TOKEN: &str = "Token is invalid or expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub is_staff: bool,
    pub token_type: TokenKind,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<i64> {
        self.sub
            .parse()
            .map_err(|_| AppError::Unauthenticated(INVALID_TOKEN.to_string()))
    }
}

/// Issues and validates HS256 access/refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

impl TokenIssuer {
    pub fn new(secret: String, access_ttl: chrono::Duration, refresh_ttl: chrono::Duration) -> Self {
        Self {
            secret,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            chrono::Duration::minutes(config.access_token_minutes),
            chrono::Duration::days(config.refresh_token_days),
        )
    }

    pub fn issue(&self, user: &UserModel, kind: TokenKind) -> AppResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let exp = now
            + match kind {
                TokenKind::Access => self.access_ttl,
                TokenKind::Refresh => self.refresh_ttl,
            };
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            is_staff: user.is_staff,
            token_type: kind,
            jti: uuid::Uuid::new_v4().to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("JWT error: {}", e)))?;
        Ok((token, exp))
    }

    /// Decodes a token, rejecting expired tokens and tokens of the other kind.
    pub fn decode(&self, token: &str, kind: TokenKind) -> AppResult<Claims> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthenticated(INVALID_TOKEN.to_string()))?
        .claims;

        if claims.token_type != kind {
            return Err(AppError::Unauthenticated(
                "Given token not valid for this token type".to_string(),
            ));
        }
        Ok(claims)
    }
}

/// Hashes a password into an argon2 PHC string.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt_bytes: [u8; 16] = rand::thread_rng().gen();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("Failed to encode salt: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|_| AppError::Internal("Invalid password hash in database".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub struct AuthServiceImpl {
    accounts: Arc<dyn AccountStore>,
    tokens: TokenIssuer,
}

impl AuthServiceImpl {
    pub fn new(accounts: Arc<dyn AccountStore>, tokens: TokenIssuer) -> Self {
        Self { accounts, tokens }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let req = request.into_inner();

        if req.email.is_empty() {
            return Err(AppError::MissingParameter("email").into());
        }
        if req.password.is_empty() {
            return Err(AppError::MissingParameter("password").into());
        }

        let email = normalize_email(&req.email);
        let user = self
            .accounts
            .find_user_by_email(&email)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| Status::unauthenticated(NO_ACTIVE_ACCOUNT))?;

        if !verify_password(&req.password, &user.password_hash)? {
            tracing::warn!("Failed login for {}", email);
            return Err(Status::unauthenticated(NO_ACTIVE_ACCOUNT));
        }

        self.accounts.record_login(user.id).await?;

        let (access, access_exp) = self.tokens.issue(&user, TokenKind::Access)?;
        let (refresh, _) = self.tokens.issue(&user, TokenKind::Refresh)?;

        tracing::info!("User {} logged in", user.email);

        Ok(Response::new(LoginResponse {
            access,
            refresh,
            email: user.email,
            name: user.first_name,
            is_staff: user.is_staff,
            access_expires_at: access_exp.to_rfc3339(),
        }))
    }

    async fn refresh_token(
        &self,
        request: Request<RefreshTokenRequest>,
    ) -> Result<Response<RefreshTokenResponse>, Status> {
        let req = request.into_inner();

        if req.refresh.is_empty() {
            return Err(AppError::MissingParameter("refresh").into());
        }

        let claims = self.tokens.decode(&req.refresh, TokenKind::Refresh)?;
        let user = self
            .accounts
            .get_user(claims.user_id()?)
            .await
            .map_err(|_| Status::unauthenticated(INVALID_TOKEN))?;
        if !user.is_active {
            return Err(Status::unauthenticated("User is inactive"));
        }

        let (access, access_exp) = self.tokens.issue(&user, TokenKind::Access)?;

        Ok(Response::new(RefreshTokenResponse {
            access,
            access_expires_at: access_exp.to_rfc3339(),
        }))
    }

    async fn logout(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<LogoutResponse>, Status> {
        let user = authenticated_user(&request)?;
        tracing::info!("User {} logged out", user.email);

        Ok(Response::new(LogoutResponse {
            message: "Logged out successfully.".to_string(),
        }))
    }
}
