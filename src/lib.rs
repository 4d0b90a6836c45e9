pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod geocode;
pub mod keepalive;
pub mod mailer;
pub mod media;
pub mod messaging;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod profile;
pub mod publication;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::auth::{forgot_password, login, register, reset_password};
use crate::error::ApiError;
use crate::messaging::{list_conversations, list_messages, mark_read, send_message};
use crate::notification::{
    create_notification, delete_notification, list_notifications, mark_notification_read,
};
use crate::profile::{get_profile, update_profile};
use crate::publication::{
    create_publication, delete_publication, get_publication, list_publications,
    list_user_publications,
};

/// Publications carry their pictures inline as base64 data URLs.
pub const JSON_BODY_LIMIT: usize = 25 * 1024 * 1024;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_BODY_LIMIT)
        .error_handler(|err, _req| {
            ApiError::validation(format!("Invalid request body: {}", err)).into()
        })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::validation(format!("Invalid query string: {}", err)).into()
    })
}

/// Registers every route group. Shared by the server binary and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .route("/health", web::get().to(health))
        .service(
            web::scope("/api/auth")
                .route("/register", web::post().to(register))
                .route("/login", web::post().to(login))
                .route("/forgot-password", web::post().to(forgot_password))
                .route("/reset-password", web::post().to(reset_password)),
        )
        .service(
            web::scope("/api/objects")
                .route("", web::post().to(create_publication))
                .route("", web::get().to(list_publications))
                .route("/user/{id}", web::get().to(list_user_publications))
                .route("/{id}", web::get().to(get_publication))
                .route("/{id}", web::delete().to(delete_publication)),
        )
        .service(
            web::scope("/api/messages")
                .route("", web::post().to(send_message))
                .route("/conversations/{user_id}", web::get().to(list_conversations))
                .route("/mark-read/{user_id1}/{user_id2}", web::put().to(mark_read))
                .route("/{user_id1}/{user_id2}", web::get().to(list_messages)),
        )
        .service(
            web::scope("/api/profile")
                .route("", web::get().to(get_profile))
                .route("", web::put().to(update_profile))
                .route("/update-profile", web::put().to(update_profile)),
        )
        .service(
            web::scope("/api/notifications")
                .route("", web::post().to(create_notification))
                .route("/read/{id}", web::put().to(mark_notification_read))
                .route("/{user_id}", web::get().to(list_notifications))
                .route("/{id}", web::delete().to(delete_notification)),
        );
}
