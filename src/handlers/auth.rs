//! HTTP endpoints for registration, login, token refresh, logout and account recovery

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::service::{AuthService, RegisterRequest};
use crate::auth::token::extract_bearer_token;
use crate::error::GatekeyError;

/// Shared reference to the authentication service
pub type SharedAuthService = Arc<AuthService>;

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

const RESET_REQUESTED_MESSAGE: &str =
    "If this e-mail address is registered, a reset link has been sent";

/// Error body returned to clients
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

/// Response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

fn success_reply<T: Serialize>(data: T, status: StatusCode) -> Response {
    let body = ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn failure_reply(status: StatusCode, code: &'static str, message: String) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        error: Some(ApiError { code, message }),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Maps an error to a response.
///
/// Token failures are reported uniformly as `unauthenticated` so the response
/// does not reveal which check failed. Expiry is the one exception.
pub fn error_reply(err: &GatekeyError) -> Response {
    let code = err.public_code();
    let (status, message) = match err {
        GatekeyError::ExpiredToken => (
            StatusCode::UNAUTHORIZED,
            "Token expired, please log in again".to_string(),
        ),
        GatekeyError::InvalidCredentials => {
            (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
        }
        e if e.is_authentication_failure() => {
            log::debug!("Request rejected as unauthenticated: {}", e);
            (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
        }
        GatekeyError::WeakPassword | GatekeyError::ValidationError(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        GatekeyError::UniqueConstraintViolation(_) => (
            StatusCode::CONFLICT,
            "This email address is already registered".to_string(),
        ),
        GatekeyError::UserNotFound => (StatusCode::NOT_FOUND, err.to_string()),
        GatekeyError::InvalidOneTimeToken => (StatusCode::BAD_REQUEST, err.to_string()),
        GatekeyError::Forbidden => (StatusCode::FORBIDDEN, err.to_string()),
        _ => {
            log::error!("Internal error while handling auth request: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    };
    failure_reply(status, code, message)
}

/// Picks the access token from `Authorization: Bearer` or `X-Auth-Token`
pub fn extract_token(authorization: Option<&str>, custom_header: Option<&str>) -> Option<String> {
    if let Some(token) = authorization.and_then(extract_bearer_token) {
        log::debug!("Token extracted from Authorization header");
        return Some(token.to_string());
    }
    if let Some(token) = custom_header.map(str::trim).filter(|t| !t.is_empty()) {
        log::debug!("Token extracted from X-Auth-Token header");
        return Some(token.to_string());
    }
    None
}

fn with_auth(
    auth: SharedAuthService,
) -> impl Filter<Extract = (SharedAuthService,), Error = Infallible> + Clone {
    warp::any().map(move || auth.clone())
}

fn with_token() -> impl Filter<Extract = (Option<String>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("x-auth-token"))
        .map(|authorization: Option<String>, custom: Option<String>| {
            extract_token(authorization.as_deref(), custom.as_deref())
        })
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// All authentication routes plus `/health`, with JSON rejection handling
pub fn auth_routes(
    auth: SharedAuthService,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let register = warp::path!("api" / "auth" / "register")
        .and(warp::post())
        .and(json_body::<RegisterRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_register);

    let login = warp::path!("api" / "auth" / "login")
        .and(warp::post())
        .and(json_body::<LoginRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_login);

    let refresh = warp::path!("api" / "auth" / "refresh")
        .and(warp::post())
        .and(json_body::<RefreshRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_refresh);

    let logout = warp::path!("api" / "auth" / "logout")
        .and(warp::post())
        .and(with_token())
        .and(with_auth(auth.clone()))
        .and_then(handle_logout);

    let me = warp::path!("api" / "auth" / "me")
        .and(warp::get())
        .and(with_token())
        .and(with_auth(auth.clone()))
        .and_then(handle_me);

    let password = warp::path!("api" / "auth" / "password")
        .and(warp::post())
        .and(with_token())
        .and(json_body::<ChangePasswordRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_change_password);

    let verify_email = warp::path!("api" / "auth" / "verify-email")
        .and(warp::post())
        .and(json_body::<VerifyEmailRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_verify_email);

    let forgot_password = warp::path!("api" / "auth" / "forgot-password")
        .and(warp::post())
        .and(json_body::<ForgotPasswordRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_forgot_password);

    let reset_password = warp::path!("api" / "auth" / "reset-password")
        .and(warp::post())
        .and(json_body::<ResetPasswordRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_reset_password);

    let revoke = warp::path!("api" / "auth" / "revoke")
        .and(warp::post())
        .and(with_token())
        .and(json_body::<RevokeRequest>())
        .and(with_auth(auth.clone()))
        .and_then(handle_revoke);

    let stats = warp::path!("api" / "auth" / "stats")
        .and(warp::get())
        .and(with_token())
        .and(with_auth(auth))
        .and_then(handle_stats);

    let health = warp::path!("health").and(warp::get()).map(|| "OK");

    register
        .or(login)
        .or(refresh)
        .or(logout)
        .or(me)
        .or(password)
        .or(verify_email)
        .or(forgot_password)
        .or(reset_password)
        .or(revoke)
        .or(stats)
        .or(health)
        .recover(handle_rejection)
}

pub async fn handle_register(
    request: RegisterRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    Ok(match auth.register(request).await {
        Ok(session) => success_reply(session, StatusCode::CREATED),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_login(
    request: LoginRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    Ok(match auth.login(&request.email, &request.password).await {
        Ok(session) => success_reply(session, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_refresh(
    request: RefreshRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    Ok(match auth.refresh(&request.refresh_token).await {
        Ok(session) => success_reply(session, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_logout(
    token: Option<String>,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    let token = match token {
        Some(token) => token,
        None => return Ok(error_reply(&GatekeyError::Unauthorized)),
    };
    Ok(match auth.logout(&token).await {
        Ok(()) => success_reply(serde_json::json!({ "logged_out": true }), StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_me(
    token: Option<String>,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    let token = match token {
        Some(token) => token,
        None => return Ok(error_reply(&GatekeyError::Unauthorized)),
    };
    let claims = match auth.authenticate(&token).await {
        Ok(claims) => claims,
        Err(e) => return Ok(error_reply(&e)),
    };
    Ok(match auth.current_user(&claims).await {
        Ok(profile) => success_reply(profile, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_change_password(
    token: Option<String>,
    request: ChangePasswordRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    let token = match token {
        Some(token) => token,
        None => return Ok(error_reply(&GatekeyError::Unauthorized)),
    };
    let claims = match auth.authenticate(&token).await {
        Ok(claims) => claims,
        Err(e) => return Ok(error_reply(&e)),
    };
    Ok(
        match auth
            .change_password(&claims, &request.current_password, &request.new_password)
            .await
        {
            Ok(()) => success_reply(serde_json::json!({ "password_changed": true }), StatusCode::OK),
            Err(e) => error_reply(&e),
        },
    )
}

pub async fn handle_verify_email(
    request: VerifyEmailRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    Ok(match auth.verify_email(&request.token).await {
        Ok(profile) => success_reply(profile, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_forgot_password(
    request: ForgotPasswordRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    Ok(match auth.request_password_reset(&request.email).await {
        Ok(()) => success_reply(
            serde_json::json!({ "message": RESET_REQUESTED_MESSAGE }),
            StatusCode::OK,
        ),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_reset_password(
    request: ResetPasswordRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    Ok(match auth.reset_password(&request.token, &request.password).await {
        Ok(()) => success_reply(serde_json::json!({ "password_reset": true }), StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_revoke(
    token: Option<String>,
    request: RevokeRequest,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    let token = match token {
        Some(token) => token,
        None => return Ok(error_reply(&GatekeyError::Unauthorized)),
    };
    let claims = match auth.authenticate(&token).await {
        Ok(claims) => claims,
        Err(e) => return Ok(error_reply(&e)),
    };
    Ok(match auth.revoke_token(&claims, &request.token).await {
        Ok(()) => success_reply(serde_json::json!({ "revoked": true }), StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

pub async fn handle_stats(
    token: Option<String>,
    auth: SharedAuthService,
) -> Result<Response, Infallible> {
    let token = match token {
        Some(token) => token,
        None => return Ok(error_reply(&GatekeyError::Unauthorized)),
    };
    let claims = match auth.authenticate(&token).await {
        Ok(claims) => claims,
        Err(e) => return Ok(error_reply(&e)),
    };
    Ok(match auth.stats(&claims).await {
        Ok(stats) => success_reply(stats, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

/// Turns warp rejections into the JSON envelope
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "Endpoint not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "bad_request", format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", "Request body too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type", "Expected a JSON body".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed".to_string())
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal server error".to_string())
    };
    Ok(failure_reply(status, code, message))
}
