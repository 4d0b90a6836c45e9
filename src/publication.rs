use actix_web::{web, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use futures::stream::TryStreamExt;
use log::{error, info, warn};
use mongodb::bson::{doc, from_document, oid::ObjectId, DateTime as BsonDateTime, Document};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::media::{validate_data_url, UploadedMedia};
use crate::middleware::AuthUser;
use crate::models::item::{Category, Image, Item, ItemType};
use crate::models::publication::{
    populate_pipeline, CreatedPublication, PopulatedPublication, Publication, PublicationView,
};
use crate::models::{now, parse_object_id, total_pages, GeoPoint, PageQuery};
use crate::notification::notify_nearby;

pub const DEFAULT_PAGE_SIZE: u64 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePublicationRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    pub reward: Option<f64>,
    #[serde(default)]
    pub color: String,
    pub item_type: Option<ItemType>,
    pub category: Option<Category>,
    #[serde(default)]
    pub images: Vec<String>,
}

/// A create request that passed validation.
#[derive(Debug)]
pub struct NewPublication {
    pub title: String,
    pub date: BsonDateTime,
    pub location: String,
    pub description: String,
    pub reward: f64,
    pub color: String,
    pub item_type: ItemType,
    pub category: Category,
    pub images: Vec<String>,
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl CreatePublicationRequest {
    pub fn validate(self) -> Result<NewPublication, ApiError> {
        let (item_type, category) = match (self.item_type, self.category) {
            (Some(t), Some(c))
                if !self.title.trim().is_empty()
                    && !self.date.trim().is_empty()
                    && !self.location.trim().is_empty()
                    && !self.description.trim().is_empty()
                    && !self.color.trim().is_empty() =>
            {
                (t, c)
            }
            _ => return Err(ApiError::validation("Please provide the required fields")),
        };
        if self.images.is_empty() {
            return Err(ApiError::validation("Please upload at least one image"));
        }
        for image in &self.images {
            validate_data_url(image).map_err(|e| ApiError::validation(e.to_string()))?;
        }
        let date = parse_date(&self.date).ok_or_else(|| ApiError::validation("Invalid date"))?;
        let reward = self.reward.unwrap_or(0.0);
        if !reward.is_finite() || reward < 0.0 {
            return Err(ApiError::validation("Reward cannot be negative"));
        }

        Ok(NewPublication {
            title: self.title.trim().to_string(),
            date: BsonDateTime::from_millis(date.timestamp_millis()),
            location: self.location.trim().to_string(),
            description: self.description.trim().to_string(),
            reward,
            color: self.color.trim().to_string(),
            item_type,
            category,
            images: self.images,
        })
    }
}

/// What has to be undone if publication creation fails part way.
#[derive(Default)]
struct CreationRollback {
    media: Vec<UploadedMedia>,
    image_ids: Vec<ObjectId>,
    item_id: Option<ObjectId>,
}

impl CreationRollback {
    async fn run(self, data: &AppState) {
        if let Some(item_id) = self.item_id {
            if let Err(e) = data.mongodb.items().delete_one(doc! { "_id": item_id }).await {
                error!("Rollback: could not delete item {}: {}", item_id, e);
            }
        }
        if !self.image_ids.is_empty() {
            if let Err(e) = data
                .mongodb
                .images()
                .delete_many(doc! { "_id": { "$in": self.image_ids } })
                .await
            {
                error!("Rollback: could not delete image records: {}", e);
            }
        }
        destroy_media(data, self.media.iter().map(|m| m.public_id.as_str())).await;
    }
}

/// Best effort: failures are logged, never returned.
async fn destroy_media<'a>(data: &AppState, public_ids: impl Iterator<Item = &'a str>) {
    join_all(public_ids.map(|public_id| async move {
        if let Err(e) = data.media.destroy(public_id).await {
            warn!("Media delete error for {}: {}", public_id, e);
        }
    }))
    .await;
}

async fn persist(
    data: &AppState,
    new: &NewPublication,
    geo_location: GeoPoint,
    owner: ObjectId,
    rollback: &mut CreationRollback,
) -> Result<Publication, ApiError> {
    let created = now();
    let item_id = ObjectId::new();
    let images: Vec<Image> = rollback
        .media
        .iter()
        .map(|m| Image {
            id: ObjectId::new(),
            url: m.url.clone(),
            public_id: m.public_id.clone(),
            item: item_id,
            created_at: created,
        })
        .collect();
    rollback.image_ids = images.iter().map(|i| i.id).collect();
    data.mongodb.images().insert_many(&images).await?;

    let item = Item {
        id: item_id,
        color: new.color.clone(),
        item_type: new.item_type,
        category: new.category,
        images: rollback.image_ids.clone(),
        created_at: created,
        updated_at: created,
    };
    rollback.item_id = Some(item_id);
    data.mongodb.items().insert_one(&item).await?;

    let publication = Publication {
        id: ObjectId::new(),
        title: new.title.clone(),
        date: new.date,
        location: new.location.clone(),
        geo_location,
        description: new.description.clone(),
        reward: new.reward,
        user: owner,
        item: item_id,
        created_at: created,
        updated_at: created,
    };
    data.mongodb.publications().insert_one(&publication).await?;
    Ok(publication)
}

/// POST /api/objects
pub async fn create_publication(
    data: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<CreatePublicationRequest>,
) -> Result<HttpResponse, ApiError> {
    let new = body.into_inner().validate()?;
    let geo_location = data
        .geocoder
        .lookup(&new.location)
        .await
        .map_err(|e| e.into_api_error("Invalid location provided"))?;

    let uploads = join_all(new.images.iter().map(|img| data.media.upload(img))).await;
    let mut rollback = CreationRollback::default();
    let mut upload_error = None;
    for upload in uploads {
        match upload {
            Ok(media) => rollback.media.push(media),
            Err(e) => upload_error = Some(e),
        }
    }
    if let Some(e) = upload_error {
        error!("Image upload failed: {}", e);
        rollback.run(&data).await;
        return Err(ApiError::internal("Failed to upload one or more images"));
    }

    let publication = match persist(&data, &new, geo_location, user.id(), &mut rollback).await {
        Ok(p) => p,
        Err(e) => {
            error!("Creating publication failed, rolling back: {}", e);
            rollback.run(&data).await;
            return Err(e);
        }
    };
    info!("Publication created {} by {}", publication.id, user.id());

    if let Err(e) = notify_nearby(&data, &publication, new.item_type).await {
        warn!("Nearby notifications for {} failed: {}", publication.id, e);
    }

    Ok(HttpResponse::Created().json(json!({
        "message": "Publication created",
        "publication": CreatedPublication::from(&publication),
    })))
}

async fn load_views(
    data: &AppState,
    filter: Document,
    skip: u64,
    limit: Option<u64>,
) -> Result<Vec<PublicationView>, ApiError> {
    let rows: Vec<Document> = data
        .mongodb
        .publications()
        .aggregate(populate_pipeline(filter, skip, limit))
        .await?
        .try_collect()
        .await?;
    rows.into_iter()
        .map(|row| Ok(from_document::<PopulatedPublication>(row)?.into()))
        .collect()
}

/// GET /api/objects
pub async fn list_publications(
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let (page, limit, skip) = query.window(DEFAULT_PAGE_SIZE);
    let total = data.mongodb.publications().count_documents(doc! {}).await?;
    let items = load_views(&data, doc! {}, skip, Some(limit)).await?;

    Ok(HttpResponse::Ok().json(json!({
        "items": items,
        "currentPage": page,
        "totalItems": total,
        "totalPages": total_pages(total, limit),
    })))
}

/// GET /api/objects/{id}
pub async fn get_publication(
    data: web::Data<AppState>,
    _user: AuthUser,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_object_id(&id, "publication id")?;
    let publication = load_views(&data, doc! { "_id": id }, 0, Some(1))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("Publication not found"))?;
    Ok(HttpResponse::Ok().json(publication))
}

/// GET /api/objects/user/{id}
pub async fn list_user_publications(
    data: web::Data<AppState>,
    _user: AuthUser,
    user_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let owner = parse_object_id(&user_id, "user id")?;
    let items = load_views(&data, doc! { "user": owner }, 0, None).await?;
    Ok(HttpResponse::Ok().json(items))
}

async fn delete_records(
    data: &AppState,
    publication: &Publication,
) -> Result<(), mongodb::error::Error> {
    let db = &data.mongodb;
    if !data.config.use_transactions {
        db.images().delete_many(doc! { "item": publication.item }).await?;
        db.items().delete_one(doc! { "_id": publication.item }).await?;
        db.publications().delete_one(doc! { "_id": publication.id }).await?;
        return Ok(());
    }

    let mut session = db.client.start_session().await?;
    session.start_transaction().await?;
    let result = async {
        db.images()
            .delete_many(doc! { "item": publication.item })
            .session(&mut session)
            .await?;
        db.items()
            .delete_one(doc! { "_id": publication.item })
            .session(&mut session)
            .await?;
        db.publications()
            .delete_one(doc! { "_id": publication.id })
            .session(&mut session)
            .await?;
        Ok::<(), mongodb::error::Error>(())
    }
    .await;

    match result {
        Ok(()) => session.commit_transaction().await,
        Err(e) => {
            if let Err(abort) = session.abort_transaction().await {
                warn!("Aborting delete transaction failed: {}", abort);
            }
            Err(e)
        }
    }
}

/// DELETE /api/objects/{id}
pub async fn delete_publication(
    data: web::Data<AppState>,
    user: AuthUser,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_object_id(&id, "publication id")?;
    let publication = data
        .mongodb
        .publications()
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Publication not found"))?;
    if publication.user != user.id() {
        warn!("User {} tried to delete publication {}", user.id(), id);
        return Err(ApiError::forbidden("You can only delete your own publications"));
    }

    let images: Vec<Image> = data
        .mongodb
        .images()
        .find(doc! { "item": publication.item })
        .await?
        .try_collect()
        .await?;
    destroy_media(&data, images.iter().map(|img| img.public_id.as_str())).await;

    delete_records(&data, &publication).await?;
    info!(
        "Publication {} deleted with item {} and {} image(s)",
        id,
        publication.item,
        images.len()
    );

    Ok(HttpResponse::Ok().json(json!({ "message": "Item and related data successfully deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn request(images: Vec<String>) -> CreatePublicationRequest {
        serde_json::from_value(json!({
            "title": "Black wallet",
            "date": "2025-03-14",
            "location": "Avenue Habib Bourguiba, Tunis",
            "description": "Lost near the clock tower",
            "color": "black",
            "itemType": "Lost",
            "category": "accessory",
            "images": images,
        }))
        .unwrap()
    }

    #[test]
    fn zero_images_is_rejected() {
        let err = request(vec![]).validate().unwrap_err();
        assert_eq!(err.to_string(), "Please upload at least one image");
    }

    #[test]
    fn remote_image_urls_are_rejected() {
        let err = request(vec!["https://example.com/a.png".into()])
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid image format");
    }

    #[test]
    fn missing_fields_are_rejected_before_images() {
        let mut req = request(vec![]);
        req.color = " ".into();
        let err = req.validate().unwrap_err();
        assert_eq!(err.to_string(), "Please provide the required fields");

        let mut req = request(vec![PIXEL.into()]);
        req.category = None;
        assert!(req.validate().is_err());
    }

    #[test]
    fn reward_defaults_to_zero() {
        let new = request(vec![PIXEL.into()]).validate().unwrap();
        assert_eq!(new.reward, 0.0);
        assert_eq!(new.item_type, ItemType::Lost);
        assert_eq!(new.category, Category::Accessory);
    }

    #[test]
    fn negative_reward_is_rejected() {
        let mut req = request(vec![PIXEL.into()]);
        req.reward = Some(-1.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn unknown_category_fails_deserialization() {
        let parsed = serde_json::from_value::<CreatePublicationRequest>(json!({
            "category": "furniture",
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn dates_accept_day_or_timestamp() {
        let day = parse_date("2025-03-14").unwrap();
        assert_eq!(day.to_rfc3339(), "2025-03-14T00:00:00+00:00");
        let ts = parse_date("2025-03-14T09:30:00+01:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-14T08:30:00+00:00");
        assert!(parse_date("14/03/2025").is_none());
    }
}
