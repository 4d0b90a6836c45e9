pub mod item;
pub mod message;
pub mod notification;
pub mod publication;
pub mod user;

use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const USERS: &str = "users";
pub const ITEMS: &str = "items";
pub const IMAGES: &str = "images";
pub const PUBLICATIONS: &str = "publications";
pub const MESSAGES: &str = "messages";
pub const NOTIFICATIONS: &str = "notifications";

/// GeoJSON point. Coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: PointKind,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    Point,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        GeoPoint {
            kind: PointKind::Point,
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

pub const MAX_PAGE_SIZE: u64 = 100;

/// `?page=&limit=` query, 1-based.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageQuery {
    /// Returns `(page, limit, skip)` with out-of-range values clamped.
    pub fn window(&self, default_limit: u64) -> (u64, u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_SIZE);
        (page, limit, (page - 1) * limit)
    }
}

pub fn total_pages(total: u64, limit: u64) -> u64 {
    total.div_ceil(limit.max(1))
}

/// Parses a hex ObjectId coming from a path or body, rejecting with 400.
pub fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ApiError::validation(format!("Invalid {}", what)))
}

pub fn to_chrono(dt: BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}

pub fn now() -> BsonDateTime {
    BsonDateTime::from_millis(Utc::now().timestamp_millis())
}
