use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::header::HeaderValue;
use http::Request as HttpRequest;
use http::Response as HttpResponse;
use http_body_util::combinators::UnsyncBoxBody;
use tonic::{Request, Status};
use tower::{Layer, Service};

use crate::services::auth_service::{TokenIssuer, TokenKind};

/// Authenticated user info injected by the auth middleware into request extensions.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub email: String,
    pub is_staff: bool,
}

/// Paths that never look at the Authorization header
const PUBLIC_PATHS: &[&str] = &[
    "/achados.auth.AuthService/Login",
    "/achados.auth.AuthService/RefreshToken",
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path == *p)
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Returns the user injected by [`AuthMiddleware`], or `UNAUTHENTICATED`.
pub fn authenticated_user<T>(request: &Request<T>) -> Result<AuthenticatedUser, Status> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated("Authentication credentials were not provided."))
}

/// Like [`authenticated_user`], additionally requiring a staff account.
pub fn require_staff<T>(request: &Request<T>) -> Result<AuthenticatedUser, Status> {
    let user = authenticated_user(request)?;
    if !user.is_staff {
        tracing::warn!("User {} denied staff-only call", user.email);
        return Err(Status::permission_denied(
            "You do not have permission to perform this action.",
        ));
    }
    Ok(user)
}

#[derive(Clone)]
pub struct AuthLayer {
    tokens: TokenIssuer,
}

impl AuthLayer {
    pub fn new(tokens: TokenIssuer) -> Self {
        Self { tokens }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            tokens: self.tokens.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    tokens: TokenIssuer,
}

type BoxBody = UnsyncBoxBody<bytes::Bytes, Status>;

fn grpc_status_response(status: Status) -> HttpResponse<BoxBody> {
    let code = status.code() as i32;
    let message = status.message().to_string();

    let mut response = HttpResponse::new(UnsyncBoxBody::default());
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/grpc"),
    );
    response
        .headers_mut()
        .insert("grpc-status", HeaderValue::from(code));
    if !message.is_empty() {
        if let Ok(val) = HeaderValue::from_str(&message) {
            response.headers_mut().insert("grpc-message", val);
        }
    }
    response
}

impl<S, ReqBody> Service<HttpRequest<ReqBody>> for AuthMiddleware<S>
where
    S: Service<HttpRequest<ReqBody>, Response = HttpResponse<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = HttpResponse<BoxBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: HttpRequest<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        let tokens = self.tokens.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();

            if is_public_path(&path) {
                return inner.call(req).await;
            }

            let token = req
                .headers()
                .get(http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
                .map(|s| s.to_string());

            // No token: anonymous call, services decide what is allowed
            if let Some(token) = token {
                match tokens.decode(&token, TokenKind::Access) {
                    Ok(claims) => {
                        let user_id = match claims.user_id() {
                            Ok(id) => id,
                            Err(e) => return Ok(grpc_status_response(e.into())),
                        };
                        req.extensions_mut().insert(AuthenticatedUser {
                            user_id,
                            email: claims.email,
                            is_staff: claims.is_staff,
                        });
                    }
                    Err(e) => {
                        tracing::debug!("Rejected bearer token on {}: {}", path, e);
                        return Ok(grpc_status_response(e.into()));
                    }
                }
            }

            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/achados.auth.AuthService/Login"));
        assert!(is_public_path("/grpc.health.v1.Health/Check"));
        assert!(!is_public_path("/achados.auth.AuthService/Logout"));
        assert!(!is_public_path("/achados.items.ItemsService/CreateItem"));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }

    #[test]
    fn test_require_staff() {
        let mut request = Request::new(());
        assert_eq!(
            require_staff(&request).unwrap_err().code(),
            Code::Unauthenticated
        );

        request.extensions_mut().insert(AuthenticatedUser {
            user_id: 2,
            email: "visitor@example.com".to_string(),
            is_staff: false,
        });
        assert_eq!(
            require_staff(&request).unwrap_err().code(),
            Code::PermissionDenied
        );

        request.extensions_mut().insert(AuthenticatedUser {
            user_id: 1,
            email: "staff@example.com".to_string(),
            is_staff: true,
        });
        assert_eq!(require_staff(&request).unwrap().user_id, 1);
    }

    #[test]
    fn test_grpc_status_response_headers() {
        let response = grpc_status_response(Status::unauthenticated("Token is invalid or expired"));
        let headers = response.headers();
        assert_eq!(headers.get("grpc-status").unwrap(), "16");
        assert_eq!(
            headers.get("grpc-message").unwrap(),
            "Token is invalid or expired"
        );
    }
}
