use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::{ok, ready, Ready};
use log::{error, warn};
use mongodb::bson::{doc, oid::ObjectId};

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::error::ApiError;
use crate::models::user::User;

const INVALID_TOKEN: &str = "Invalid or expired token";

/// Resolves a bearer token into the owning [`User`].
///
/// Every request passes through. Handlers that need a user ask for [`AuthUser`],
/// which fails with 401 when no header was sent or when the token did not resolve,
/// so a stale token never blocks the public routes.
#[derive(Debug)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        Box::pin(async move {
            match authenticate(&req).await {
                Ok(Some(user)) => {
                    req.extensions_mut().insert(AuthUser(user));
                }
                Ok(None) => {}
                Err(ApiError::Unauthorized(_)) => {
                    req.extensions_mut().insert(AuthFailure::InvalidToken);
                }
                Err(e) => {
                    error!("Resolving bearer token failed: {}", e);
                    req.extensions_mut().insert(AuthFailure::Lookup);
                }
            }
            service.call(req).await
        })
    }
}

async fn authenticate(req: &ServiceRequest) -> Result<Option<User>, ApiError> {
    let header = match req.headers().get(http::header::AUTHORIZATION) {
        Some(h) => h,
        None => return Ok(None),
    };
    let token = header
        .to_str()
        .ok()
        .and_then(bearer_token)
        .ok_or_else(|| ApiError::unauthorized(INVALID_TOKEN))?;

    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::internal("application state missing"))?;

    let claims = validate_jwt(token, &state.config.jwt_secret).map_err(|e| {
        warn!("Rejected token: {}", e);
        ApiError::unauthorized(INVALID_TOKEN)
    })?;
    let user_id =
        ObjectId::parse_str(&claims.sub).map_err(|_| ApiError::unauthorized(INVALID_TOKEN))?;

    match state.mongodb.users().find_one(doc! { "_id": user_id }).await? {
        Some(user) => Ok(Some(user)),
        None => {
            warn!("Token for unknown user {}", user_id);
            Err(ApiError::unauthorized(INVALID_TOKEN))
        }
    }
}

/// Extracts the token from a `Bearer <token>` header value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Why a present `Authorization` header did not produce an [`AuthUser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthFailure {
    InvalidToken,
    Lookup,
}

/// The authenticated user attached by [`Authentication`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> ObjectId {
        self.0.id
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let extensions = req.extensions();
        let result = match (extensions.get::<AuthUser>(), extensions.get::<AuthFailure>()) {
            (Some(user), _) => Ok(user.clone()),
            (None, Some(AuthFailure::InvalidToken)) => Err(ApiError::unauthorized(INVALID_TOKEN)),
            (None, Some(AuthFailure::Lookup)) => Err(ApiError::internal("authentication lookup failed")),
            (None, None) => Err(ApiError::unauthorized("No authentication token, access denied")),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic dXNlcjpwdw=="), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[actix_web::test]
    async fn extractor_reports_why_no_user_is_attached() {
        let req = actix_web::test::TestRequest::default().to_http_request();
        let err = AuthUser::extract(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "No authentication token, access denied");

        let req = actix_web::test::TestRequest::default().to_http_request();
        req.extensions_mut().insert(AuthFailure::InvalidToken);
        let err = AuthUser::extract(&req).await.unwrap_err();
        assert_eq!(err.to_string(), INVALID_TOKEN);

        let req = actix_web::test::TestRequest::default().to_http_request();
        req.extensions_mut().insert(AuthFailure::Lookup);
        let err = AuthUser::extract(&req).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
