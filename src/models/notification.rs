use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

/// Tag written on notifications fanned out when an item is posted nearby.
pub const NEARBY_ITEM: &str = "nearby_item";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication: Option<ObjectId>,
    #[serde(default)]
    pub read: bool,
    pub created_at: BsonDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub publication: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        NotificationView {
            id: n.id.to_hex(),
            user_id: n.user_id.to_hex(),
            kind: n.kind,
            title: n.title,
            message: n.message,
            publication: n.publication.map(|p| p.to_hex()),
            read: n.read,
            created_at: super::to_chrono(n.created_at),
        }
    }
}
