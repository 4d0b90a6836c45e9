use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    Lost,
    Found,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Electronic,
    Accessory,
    Document,
    Other,
}

/// The physical object a publication is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub color: String,
    pub item_type: ItemType,
    pub category: Category,
    #[serde(default)]
    pub images: Vec<ObjectId>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

/// An uploaded picture, owned by exactly one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub url: String,
    /// Media host identifier used to destroy the remote asset.
    pub public_id: String,
    pub item: ObjectId,
    pub created_at: BsonDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_use_client_spelling() {
        assert_eq!(serde_json::to_value(ItemType::Lost).unwrap(), "Lost");
        assert_eq!(serde_json::to_value(Category::Electronic).unwrap(), "electronic");
        let c: Category = serde_json::from_str("\"document\"").unwrap();
        assert_eq!(c, Category::Document);
        assert!(serde_json::from_str::<Category>("\"furniture\"").is_err());
    }
}
