use std::sync::OnceLock;

use actix_web::{web, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info, warn};
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime};
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::app_state::AppState;
use crate::error::{is_duplicate_key, ApiError};
use crate::models::now;
use crate::models::user::{default_avatar, PublicUser, User};

pub const TOKEN_TTL_DAYS: i64 = 15;
pub const RESET_TOKEN_TTL_MINUTES: i64 = 30;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_USERNAME_LEN: usize = 3;

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const INVALID_RESET_TOKEN: &str = "Invalid or expired reset token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub phone: String,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default, alias = "password")]
    pub new_password: String,
}

// JWT Creation
pub fn create_jwt(user_id: &str, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let issued = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: issued.timestamp() as usize,
        exp: (issued + Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

// JWT Validation
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    })
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email.trim())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    if req.username.trim().is_empty()
        || req.email.trim().is_empty()
        || req.password.trim().is_empty()
        || req.phone.trim().is_empty()
    {
        return Err(ApiError::validation("All fields are required!"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(
            "Password should be at least 6 characters long",
        ));
    }
    if req.username.trim().chars().count() < MIN_USERNAME_LEN {
        return Err(ApiError::validation(
            "Username should be at least 3 characters long",
        ));
    }
    if !is_valid_email(&req.email) {
        return Err(ApiError::validation("Invalid email address"));
    }
    Ok(())
}

pub async fn hash_password(password: String) -> Result<String, ApiError> {
    Ok(web::block(move || hash(password, DEFAULT_COST)).await??)
}

async fn verify_password(password: String, hashed: String) -> Result<bool, ApiError> {
    Ok(web::block(move || verify(password, &hashed)).await??)
}

/// Spends the same bcrypt work as a real check so unknown emails answer as slowly
/// as wrong passwords.
async fn verify_against_dummy(password: String) {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();
    let _ = web::block(move || {
        let dummy = DUMMY_HASH
            .get_or_init(|| hash("finder-dummy-password", DEFAULT_COST).unwrap_or_default());
        verify(password, dummy)
    })
    .await;
}

/// True for strings shaped like a token from [`new_reset_token`].
pub fn is_reset_token_shaped(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Returns `(token, digest)`. The token goes into the email, only the digest is stored.
pub fn new_reset_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let digest = reset_token_digest(&token);
    (token, digest)
}

pub fn reset_token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

fn auth_response(user: &User, secret: &str) -> Result<serde_json::Value, ApiError> {
    let token = create_jwt(&user.id.to_hex(), secret)?;
    Ok(json!({ "token": token, "user": PublicUser::from(user) }))
}

/// POST /api/auth/register
pub async fn register(
    data: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validate_registration(&body)?;

    let username = body.username.trim().to_string();
    let email = normalize_email(&body.email);
    let phone = body.phone.trim().to_string();
    let users = data.mongodb.users();

    if users.find_one(doc! { "email": &email }).await?.is_some() {
        return Err(ApiError::validation("Email already exists"));
    }
    if users.find_one(doc! { "username": &username }).await?.is_some() {
        return Err(ApiError::validation("Username already exists"));
    }
    if users.find_one(doc! { "phone": &phone }).await?.is_some() {
        return Err(ApiError::validation("Phone number already exists"));
    }

    let address = body
        .address
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    let location = match &address {
        Some(a) => Some(
            data.geocoder
                .lookup(a)
                .await
                .map_err(|e| e.into_api_error("Invalid address provided"))?,
        ),
        None => None,
    };

    let hashed = hash_password(body.password).await?;
    let created = now();
    let user = User {
        id: ObjectId::new(),
        profile_image: default_avatar(&username),
        username,
        email,
        phone,
        address,
        location,
        password: hashed,
        reset_password_token: None,
        reset_password_expires: None,
        created_at: created,
        updated_at: created,
    };

    match users.insert_one(&user).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => {
            warn!("Concurrent registration collided: {}", e);
            return Err(ApiError::validation("User already exists"));
        }
        Err(e) => return Err(e.into()),
    }
    info!("User registered {}", user.id);

    Ok(HttpResponse::Created().json(auth_response(&user, &data.config.jwt_secret)?))
}

/// POST /api/auth/login
pub async fn login(
    data: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::validation("All fields are required!"));
    }

    let user = match data
        .mongodb
        .users()
        .find_one(doc! { "email": normalize_email(&body.email) })
        .await?
    {
        Some(user) => user,
        None => {
            verify_against_dummy(body.password).await;
            return Err(ApiError::validation(INVALID_CREDENTIALS));
        }
    };

    if !verify_password(body.password, user.password.clone()).await? {
        return Err(ApiError::validation(INVALID_CREDENTIALS));
    }

    Ok(HttpResponse::Ok().json(auth_response(&user, &data.config.jwt_secret)?))
}

/// POST /api/auth/forgot-password
///
/// Answers the same way whether or not the email is registered.
pub async fn forgot_password(
    data: web::Data<AppState>,
    body: web::Json<ForgotPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&body.email);
    if email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }

    let (token, digest) = new_reset_token();
    let expires = BsonDateTime::from_millis(
        (Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES)).timestamp_millis(),
    );
    let users = data.mongodb.users();
    let user = users
        .find_one_and_update(
            doc! { "email": &email },
            doc! { "$set": {
                "resetPasswordToken": &digest,
                "resetPasswordExpires": expires,
                "updatedAt": now(),
            }},
        )
        .await?;

    match user {
        Some(user) => {
            if let Err(e) = data.mailer.send_password_reset(&user.email, &token).await {
                error!("Password reset mail to {} failed: {}", user.id, e);
                users
                    .update_one(
                        doc! { "_id": user.id, "resetPasswordToken": &digest },
                        doc! { "$unset": { "resetPasswordToken": "", "resetPasswordExpires": "" } },
                    )
                    .await?;
                return Err(ApiError::internal("password reset mail dispatch failed"));
            }
            info!("Password reset requested for {}", user.id);
        }
        None => info!("Password reset requested for unknown email"),
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "If an account exists for this email, a reset link has been sent"
    })))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    data: web::Data<AppState>,
    body: web::Json<ResetPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.token.trim().is_empty() {
        return Err(ApiError::validation("Reset token is required"));
    }
    if body.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(
            "Password should be at least 6 characters long",
        ));
    }

    let token = body.token.trim();
    if !is_reset_token_shaped(token) {
        return Err(ApiError::validation(INVALID_RESET_TOKEN));
    }
    let digest = reset_token_digest(token);
    let users = data.mongodb.users();
    let live = doc! {
        "resetPasswordToken": &digest,
        "resetPasswordExpires": { "$gt": now() },
    };
    if users.find_one(live).await?.is_none() {
        return Err(ApiError::validation(INVALID_RESET_TOKEN));
    }

    let hashed = hash_password(body.new_password).await?;
    let current = now();
    // matching on the digest and clearing it in one update makes the token single-use
    let user = users
        .find_one_and_update(
            doc! {
                "resetPasswordToken": &digest,
                "resetPasswordExpires": { "$gt": current },
            },
            doc! {
                "$set": { "password": hashed, "updatedAt": current },
                "$unset": { "resetPasswordToken": "", "resetPasswordExpires": "" },
            },
        )
        .await?
        .ok_or_else(|| ApiError::validation(INVALID_RESET_TOKEN))?;

    info!("Password reset for {}", user.id);
    Ok(HttpResponse::Ok().json(json!({ "message": "Password has been reset successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(username: &str, email: &str, password: &str, phone: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            phone: phone.into(),
            address: None,
        }
    }

    #[test]
    fn token_round_trip_carries_user_id() {
        let token = create_jwt("65f1c0ffee0000000000abcd", "secret").unwrap();
        let claims = validate_jwt(&token, "secret").unwrap();
        assert_eq!(claims.sub, "65f1c0ffee0000000000abcd");
        let ttl = claims.exp - claims.iat;
        assert_eq!(ttl as i64, Duration::days(TOKEN_TTL_DAYS).num_seconds());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = create_jwt("someone", "secret").unwrap();
        assert!(validate_jwt(&token, "other").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let past = Utc::now() - Duration::hours(2);
        let claims = Claims {
            sub: "someone".into(),
            iat: (past - Duration::days(15)).timestamp() as usize,
            exp: past.timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(validate_jwt(&token, "secret").is_err());
    }

    #[test]
    fn registration_requires_every_field() {
        let err = validate_registration(&registration("alice", "", "secret1", "123")).unwrap_err();
        assert_eq!(err.to_string(), "All fields are required!");
        assert!(validate_registration(&registration("alice", "a@x.com", "secret1", "  ")).is_err());
    }

    #[test]
    fn registration_length_rules() {
        let err = validate_registration(&registration("alice", "a@x.com", "12345", "123")).unwrap_err();
        assert_eq!(err.to_string(), "Password should be at least 6 characters long");
        let err = validate_registration(&registration("al", "a@x.com", "secret1", "123")).unwrap_err();
        assert_eq!(err.to_string(), "Username should be at least 3 characters long");
    }

    #[test]
    fn registration_rejects_malformed_email() {
        assert!(validate_registration(&registration("alice", "alice", "secret1", "123")).is_err());
        assert!(validate_registration(&registration("alice", "a@x.com", "secret1", "123")).is_ok());
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Alice@X.com "), "alice@x.com");
    }

    #[test]
    fn reset_tokens_are_random_and_stored_hashed() {
        let (t1, d1) = new_reset_token();
        let (t2, _) = new_reset_token();
        assert_ne!(t1, t2);
        assert_eq!(t1.len(), 64);
        assert_ne!(t1, d1);
        assert_eq!(reset_token_digest(&t1), d1);
    }

    #[test]
    fn only_well_formed_reset_tokens_reach_storage() {
        let (token, _) = new_reset_token();
        assert!(is_reset_token_shaped(&token));
        assert!(!is_reset_token_shaped("abc"));
        assert!(!is_reset_token_shaped(&format!("{}zz", &token[..62])));
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email(" alice@x.com "));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
    }

    #[test]
    fn reset_request_accepts_both_password_spellings() {
        let a: ResetPasswordRequest =
            serde_json::from_str(r#"{"token":"t","newPassword":"secret1"}"#).unwrap();
        let b: ResetPasswordRequest =
            serde_json::from_str(r#"{"token":"t","password":"secret1"}"#).unwrap();
        assert_eq!(a.new_password, b.new_password);
    }

    #[actix_web::test]
    async fn password_hash_verifies() {
        let hashed = hash_password("secret1".into()).await.unwrap();
        assert_ne!(hashed, "secret1");
        assert!(verify_password("secret1".into(), hashed.clone()).await.unwrap());
        assert!(!verify_password("secret2".into(), hashed).await.unwrap());
    }
}
