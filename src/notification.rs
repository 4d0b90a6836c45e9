use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use log::{info, warn};
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::item::ItemType;
use crate::models::notification::{Notification, NotificationView, NEARBY_ITEM};
use crate::models::publication::Publication;
use crate::models::{now, parse_object_id, GeoPoint};

/// Users within this distance of a new listing are notified.
pub const NEARBY_RADIUS_METERS: f64 = 5_000.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub publication: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(rename = "_id")]
    id: ObjectId,
}

pub fn nearby_users_filter(point: GeoPoint, exclude: ObjectId) -> Document {
    doc! {
        "_id": { "$ne": exclude },
        "location": {
            "$near": {
                "$geometry": { "type": "Point", "coordinates": [point.longitude(), point.latitude()] },
                "$maxDistance": NEARBY_RADIUS_METERS,
            }
        },
    }
}

pub fn nearby_item_notification(
    recipient: ObjectId,
    publication: &Publication,
    item_type: ItemType,
) -> Notification {
    let verb = match item_type {
        ItemType::Lost => "lost",
        ItemType::Found => "found",
    };
    Notification {
        id: ObjectId::new(),
        user_id: recipient,
        kind: NEARBY_ITEM.to_string(),
        title: "New item near you".to_string(),
        message: format!(
            "Someone {} \"{}\" near {}",
            verb, publication.title, publication.location
        ),
        publication: Some(publication.id),
        read: false,
        created_at: now(),
    }
}

/// Creates one notification per user living within [`NEARBY_RADIUS_METERS`] of the
/// publication, the poster excluded. Returns how many were created.
pub async fn notify_nearby(
    data: &AppState,
    publication: &Publication,
    item_type: ItemType,
) -> Result<usize, ApiError> {
    let recipients: Vec<IdOnly> = data
        .mongodb
        .users()
        .clone_with_type::<IdOnly>()
        .find(nearby_users_filter(publication.geo_location, publication.user))
        .projection(doc! { "_id": 1 })
        .await?
        .try_collect()
        .await?;
    if recipients.is_empty() {
        return Ok(0);
    }

    let notifications: Vec<Notification> = recipients
        .iter()
        .map(|r| nearby_item_notification(r.id, publication, item_type))
        .collect();
    data.mongodb
        .notifications()
        .insert_many(&notifications)
        .await?;
    info!(
        "Notified {} nearby user(s) of publication {}",
        notifications.len(),
        publication.id
    );
    Ok(notifications.len())
}

async fn owned_notification(
    data: &AppState,
    user: &AuthUser,
    raw_id: &str,
) -> Result<Notification, ApiError> {
    let id = parse_object_id(raw_id, "notification id")?;
    let notification = data
        .mongodb
        .notifications()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Notification not found"))?;
    if notification.user_id != user.id() {
        warn!("User {} touched notification {} of another user", user.id(), id);
        return Err(ApiError::forbidden("Unauthorized access"));
    }
    Ok(notification)
}

/// GET /api/notifications/{user_id}
pub async fn list_notifications(
    data: web::Data<AppState>,
    user: AuthUser,
    user_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let target = parse_object_id(&user_id, "user id")?;
    if target != user.id() {
        return Err(ApiError::forbidden("Unauthorized access"));
    }

    let notifications: Vec<NotificationView> = data
        .mongodb
        .notifications()
        .find(doc! { "userId": target })
        .sort(doc! { "createdAt": -1 })
        .await?
        .map_ok(NotificationView::from)
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(notifications))
}

/// POST /api/notifications
pub async fn create_notification(
    data: web::Data<AppState>,
    _user: AuthUser,
    body: web::Json<CreateNotificationRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.user_id.trim().is_empty()
        || body.kind.trim().is_empty()
        || body.title.trim().is_empty()
        || body.message.trim().is_empty()
    {
        return Err(ApiError::validation("userId, type, title and message are required"));
    }
    let recipient = parse_object_id(&body.user_id, "user id")?;
    let publication = match body.publication.as_deref() {
        Some(raw) => Some(parse_object_id(raw, "publication id")?),
        None => None,
    };

    if data
        .mongodb
        .users()
        .find_one(doc! { "_id": recipient })
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("User not found"));
    }

    let notification = Notification {
        id: ObjectId::new(),
        user_id: recipient,
        kind: body.kind.trim().to_string(),
        title: body.title.trim().to_string(),
        message: body.message,
        publication,
        read: false,
        created_at: now(),
    };
    data.mongodb.notifications().insert_one(&notification).await?;
    Ok(HttpResponse::Created().json(NotificationView::from(notification)))
}

/// PUT /api/notifications/read/{id}
pub async fn mark_notification_read(
    data: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let mut notification = owned_notification(&data, &user, &id).await?;
    data.mongodb
        .notifications()
        .update_one(doc! { "_id": notification.id }, doc! { "$set": { "read": true } })
        .await?;
    notification.read = true;
    Ok(HttpResponse::Ok().json(NotificationView::from(notification)))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    data: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let notification = owned_notification(&data, &user, &id).await?;
    data.mongodb
        .notifications()
        .delete_one(doc! { "_id": notification.id })
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Notification deleted" })))
}
