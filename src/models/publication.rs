use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

use super::item::{Category, ItemType};
use super::user::{UserSummary, UserSummaryView};
use super::{to_chrono, GeoPoint, IMAGES, ITEMS, USERS};

/// A lost/found listing as stored in `publications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Publication {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub date: BsonDateTime,
    pub location: String,
    pub geo_location: GeoPoint,
    pub description: String,
    #[serde(default)]
    pub reward: f64,
    pub user: ObjectId,
    pub item: ObjectId,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ImageRef {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedItem {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub color: String,
    pub item_type: ItemType,
    pub category: Category,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Output row of [`populate_pipeline`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedPublication {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub date: BsonDateTime,
    pub location: String,
    pub geo_location: GeoPoint,
    pub description: String,
    #[serde(default)]
    pub reward: f64,
    pub user: Option<UserSummary>,
    pub item: Option<PopulatedItem>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

#[derive(Debug, Serialize)]
pub struct ImageView {
    #[serde(rename = "_id")]
    pub id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    #[serde(rename = "_id")]
    pub id: String,
    pub color: String,
    pub item_type: ItemType,
    pub category: Category,
    pub images: Vec<ImageView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationView {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub geo_location: GeoPoint,
    pub description: String,
    pub reward: f64,
    pub user: Option<UserSummaryView>,
    pub item: Option<ItemView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PopulatedPublication> for PublicationView {
    fn from(p: PopulatedPublication) -> Self {
        PublicationView {
            id: p.id.to_hex(),
            title: p.title,
            date: to_chrono(p.date),
            location: p.location,
            geo_location: p.geo_location,
            description: p.description,
            reward: p.reward,
            user: p.user.map(UserSummaryView::from),
            item: p.item.map(|item| ItemView {
                id: item.id.to_hex(),
                color: item.color,
                item_type: item.item_type,
                category: item.category,
                images: item
                    .images
                    .into_iter()
                    .map(|img| ImageView {
                        id: img.id.to_hex(),
                        url: img.url,
                    })
                    .collect(),
            }),
            created_at: to_chrono(p.created_at),
            updated_at: to_chrono(p.updated_at),
        }
    }
}

/// Publication as echoed back right after creation, without population.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPublication {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub geo_location: GeoPoint,
    pub description: String,
    pub reward: f64,
    pub user: String,
    pub item: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Publication> for CreatedPublication {
    fn from(p: &Publication) -> Self {
        CreatedPublication {
            id: p.id.to_hex(),
            title: p.title.clone(),
            date: to_chrono(p.date),
            location: p.location.clone(),
            geo_location: p.geo_location,
            description: p.description.clone(),
            reward: p.reward,
            user: p.user.to_hex(),
            item: p.item.to_hex(),
            created_at: to_chrono(p.created_at),
            updated_at: to_chrono(p.updated_at),
        }
    }
}

/// Builds the aggregation that matches publications newest-first and joins the
/// owner summary and the item with its image URLs.
pub fn populate_pipeline(filter: Document, skip: u64, limit: Option<u64>) -> Vec<Document> {
    let mut pipeline = vec![
        doc! { "$match": filter },
        doc! { "$sort": { "createdAt": -1, "_id": -1 } },
    ];
    if skip > 0 {
        pipeline.push(doc! { "$skip": skip as i64 });
    }
    if let Some(limit) = limit {
        pipeline.push(doc! { "$limit": limit as i64 });
    }
    pipeline.extend([
        doc! { "$lookup": {
            "from": USERS,
            "localField": "user",
            "foreignField": "_id",
            "as": "user",
        }},
        doc! { "$unwind": { "path": "$user", "preserveNullAndEmptyArrays": true } },
        doc! { "$lookup": {
            "from": ITEMS,
            "localField": "item",
            "foreignField": "_id",
            "as": "item",
        }},
        doc! { "$unwind": { "path": "$item", "preserveNullAndEmptyArrays": true } },
        doc! { "$lookup": {
            "from": IMAGES,
            "localField": "item.images",
            "foreignField": "_id",
            "as": "item.images",
        }},
        // the images lookup materializes `item` even when the item is gone
        doc! { "$addFields": {
            "item": { "$cond": [{ "$ifNull": ["$item._id", false] }, "$item", "$$REMOVE"] },
        }},
        doc! { "$project": {
            "title": 1,
            "date": 1,
            "location": 1,
            "geoLocation": 1,
            "description": 1,
            "reward": 1,
            "createdAt": 1,
            "updatedAt": 1,
            "user._id": 1,
            "user.username": 1,
            "user.profileImage": 1,
            "item._id": 1,
            "item.color": 1,
            "item.itemType": 1,
            "item.category": 1,
            "item.images._id": 1,
            "item.images.url": 1,
        }},
    ]);
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_names(pipeline: &[Document]) -> Vec<String> {
        pipeline
            .iter()
            .map(|stage| stage.keys().next().cloned().unwrap_or_default())
            .collect()
    }

    #[test]
    fn pipeline_paginates_before_joining() {
        let pipeline = populate_pipeline(doc! {}, 10, Some(5));
        assert_eq!(
            stage_names(&pipeline)[..4],
            ["$match", "$sort", "$skip", "$limit"]
        );
        assert_eq!(pipeline[2].get_i64("$skip").unwrap(), 10);
        assert_eq!(pipeline[3].get_i64("$limit").unwrap(), 5);
    }

    #[test]
    fn pipeline_without_pagination_has_no_skip_or_limit() {
        let owner = ObjectId::new();
        let pipeline = populate_pipeline(doc! { "user": owner }, 0, None);
        let names = stage_names(&pipeline);
        assert!(!names.contains(&"$skip".to_string()));
        assert!(!names.contains(&"$limit".to_string()));
        assert_eq!(
            pipeline[0].get_document("$match").unwrap().get_object_id("user").unwrap(),
            owner
        );
    }

    #[test]
    fn projection_never_exposes_owner_password() {
        let pipeline = populate_pipeline(doc! {}, 0, None);
        let project = pipeline
            .last()
            .and_then(|s| s.get_document("$project").ok())
            .unwrap();
        assert!(project.keys().all(|k| !k.contains("password")));
    }

    #[test]
    fn populated_rows_become_hex_id_views() {
        let pub_id = ObjectId::new();
        let item_id = ObjectId::new();
        let row = doc! {
            "_id": pub_id,
            "title": "Black wallet",
            "date": BsonDateTime::from_millis(1_700_000_000_000),
            "location": "Tunis",
            "geoLocation": { "type": "Point", "coordinates": [10.18, 36.8] },
            "description": "Leather",
            "reward": 20.0,
            "user": { "_id": ObjectId::new(), "username": "alice", "profileImage": "p.png" },
            "item": {
                "_id": item_id,
                "color": "black",
                "itemType": "Lost",
                "category": "accessory",
                "images": [{ "_id": ObjectId::new(), "url": "https://img/1.jpg" }],
            },
            "createdAt": BsonDateTime::now(),
            "updatedAt": BsonDateTime::now(),
        };
        let populated: PopulatedPublication = mongodb::bson::from_document(row).unwrap();
        let view = PublicationView::from(populated);
        assert_eq!(view.id, pub_id.to_hex());
        let item = view.item.unwrap();
        assert_eq!(item.id, item_id.to_hex());
        assert_eq!(item.images[0].url, "https://img/1.jpg");
        assert_eq!(view.user.unwrap().username, "alice");
    }
}
