use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use super::{to_chrono, GeoPoint};

/// A user document as stored in `users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// bcrypt hash, never leaves the server.
    pub password: String,
    pub profile_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_password_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_password_expires: Option<BsonDateTime>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

/// The user fields that may be sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub profile_image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        PublicUser {
            id: user.id.to_hex(),
            username: user.username.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            address: user.address.clone(),
            location: user.location,
            profile_image: user.profile_image.clone(),
            created_at: to_chrono(user.created_at),
            updated_at: to_chrono(user.updated_at),
        }
    }
}

/// Owner summary embedded in publication views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    #[serde(default)]
    pub profile_image: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummaryView {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub profile_image: String,
}

impl From<UserSummary> for UserSummaryView {
    fn from(u: UserSummary) -> Self {
        UserSummaryView {
            id: u.id.to_hex(),
            username: u.username,
            profile_image: u.profile_image,
        }
    }
}

pub fn default_avatar(username: &str) -> String {
    format!(
        "https://api.dicebear.com/9.x/notionists-neutral/svg?seed={}",
        username
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> User {
        User {
            id: ObjectId::new(),
            username: "alice".into(),
            email: "a@x.com".into(),
            phone: "123".into(),
            address: None,
            location: None,
            password: "$2b$12$hash".into(),
            profile_image: default_avatar("alice"),
            reset_password_token: Some("digest".into()),
            reset_password_expires: None,
            created_at: BsonDateTime::now(),
            updated_at: BsonDateTime::now(),
        }
    }

    #[test]
    fn public_projection_has_no_secrets() {
        let v = serde_json::to_value(PublicUser::from(&sample())).unwrap();
        assert_eq!(v["username"], "alice");
        assert!(v.get("password").is_none());
        assert!(v.get("resetPasswordToken").is_none());
        assert!(v["_id"].is_string());
    }

    #[test]
    fn avatar_is_seeded_by_username() {
        assert!(default_avatar("bob").ends_with("seed=bob"));
    }
}
