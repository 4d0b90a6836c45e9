use actix_web::{web, HttpResponse};
use log::{error, info, warn};
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ReturnDocument;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{is_valid_email, normalize_email};
use crate::error::{is_duplicate_key, ApiError};
use crate::media::{MediaError, UploadedMedia};
use crate::middleware::AuthUser;
use crate::models::now;
use crate::models::user::PublicUser;

/// Fields a user may change on their own profile. Absent or blank fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub profile_image: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// The `$set` document for the plain string fields of an update.
pub fn profile_changes(req: &UpdateProfileRequest) -> Result<Document, ApiError> {
    let mut set = doc! {};
    if let Some(username) = present(&req.username) {
        if username.chars().count() < crate::auth::MIN_USERNAME_LEN {
            return Err(ApiError::validation(
                "Username should be at least 3 characters long",
            ));
        }
        set.insert("username", username);
    }
    if let Some(email) = present(&req.email) {
        if !is_valid_email(email) {
            return Err(ApiError::validation("Invalid email address"));
        }
        set.insert("email", normalize_email(email));
    }
    if let Some(phone) = present(&req.phone) {
        set.insert("phone", phone);
    }
    Ok(set)
}

/// An avatar uploaded for an update that did not land has to be removed again.
fn orphaned_upload<T, E>(
    outcome: &Result<Option<T>, E>,
    uploaded: Option<UploadedMedia>,
) -> Option<UploadedMedia> {
    match outcome {
        Ok(Some(_)) => None,
        _ => uploaded,
    }
}

/// GET /api/profile
pub async fn get_profile(user: AuthUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(json!({ "user": PublicUser::from(&user.0) })))
}

/// PUT /api/profile
pub async fn update_profile(
    data: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let mut set = profile_changes(&body)?;

    if let Some(address) = present(&body.address) {
        let location = data
            .geocoder
            .lookup(address)
            .await
            .map_err(|e| e.into_api_error("Invalid address provided"))?;
        set.insert("address", address);
        set.insert("location", to_bson(&location)?);
    }

    let mut uploaded: Option<UploadedMedia> = None;
    if let Some(image) = present(&body.profile_image) {
        let url = if image.starts_with("data:") {
            let media = data.media.upload(image).await.map_err(|e| match e {
                MediaError::InvalidPayload => ApiError::validation("Invalid image format"),
                other => ApiError::internal(other.to_string()),
            })?;
            let url = media.url.clone();
            uploaded = Some(media);
            url
        } else {
            image.to_string()
        };
        set.insert("profileImage", url);
    }

    if set.is_empty() {
        return Ok(HttpResponse::Ok().json(json!({
            "message": "Profile updated successfully!",
            "user": PublicUser::from(&user.0),
        })));
    }
    set.insert("updatedAt", now());

    let updated = data
        .mongodb
        .users()
        .find_one_and_update(doc! { "_id": user.id() }, doc! { "$set": set })
        .return_document(ReturnDocument::After)
        .await;
    if let Some(media) = orphaned_upload(&updated, uploaded) {
        if let Err(e) = data.media.destroy(&media.public_id).await {
            warn!("Could not remove orphaned avatar {}: {}", media.public_id, e);
        }
    }
    let updated = match updated {
        Ok(Some(u)) => u,
        Ok(None) => return Err(ApiError::not_found("User not found!")),
        Err(e) if is_duplicate_key(&e) => {
            return Err(ApiError::validation(
                "Username, email or phone already in use",
            ))
        }
        Err(e) => {
            error!("Error updating profile: {}", e);
            return Err(e.into());
        }
    };
    info!("Profile updated {}", updated.id);

    Ok(HttpResponse::Ok().json(json!({
        "message": "Profile updated successfully!",
        "user": PublicUser::from(&updated),
    })))
}
