/// JWT Authentication Middleware
///
/// Validates the bearer access token from the Authorization header against
/// the codec and the token registry, then injects the claims into request
/// extensions for use by route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::error::{AppError, AuthError};
use crate::session::SessionService;

/// JWT middleware for protecting routes
///
/// Must be applied to routes that require authentication.
pub struct JwtMiddleware {
    sessions: SessionService,
}

impl JwtMiddleware {
    pub fn new(sessions: SessionService) -> Self {
        Self { sessions }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            sessions: self.sessions.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    sessions: SessionService,
}

/// Token from `Authorization: Bearer <token>`, scheme matched case-insensitively.
fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let sessions = self.sessions.clone();

        Box::pin(async move {
            let Some(token) = bearer_token(&req) else {
                tracing::warn!(path = %req.path(), "Missing or invalid Authorization header");
                return Err(AppError::from(AuthError::MissingToken).into());
            };

            let claims = sessions.authenticate(&token).await.map_err(|e| {
                tracing::warn!(path = %req.path(), error = %e, "Bearer token rejected");
                Error::from(e)
            })?;

            tracing::debug!(user_id = claims.user_id, "JWT validated successfully");
            req.extensions_mut().insert(claims);
            service.call(req).await
        })
    }
}
