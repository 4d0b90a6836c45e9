use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

use super::{to_chrono, USERS};

pub const MAX_CONTENT_LEN: usize = 1000;

/// A direct message. Only `read` changes after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub sender: ObjectId,
    pub receiver: ObjectId,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    pub timestamp: BsonDateTime,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        MessageView {
            id: m.id.to_hex(),
            sender: m.sender.to_hex(),
            receiver: m.receiver.to_hex(),
            content: m.content,
            read: m.read,
            timestamp: to_chrono(m.timestamp),
        }
    }
}

/// One row of the conversation list, as produced by [`conversations_pipeline`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    pub user_id: ObjectId,
    pub username: String,
    #[serde(default)]
    pub profile_image: String,
    pub last_message: String,
    pub last_message_at: BsonDateTime,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub user_id: String,
    pub username: String,
    pub profile_image: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: i64,
}

impl From<ConversationRow> for ConversationView {
    fn from(r: ConversationRow) -> Self {
        ConversationView {
            user_id: r.user_id.to_hex(),
            username: r.username,
            profile_image: r.profile_image,
            last_message: r.last_message,
            last_message_at: to_chrono(r.last_message_at),
            unread_count: r.unread_count,
        }
    }
}

/// Length is counted in characters, not bytes.
pub fn validate_content(content: &str) -> Result<(), &'static str> {
    if content.trim().is_empty() {
        return Err("Missing or invalid required fields");
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err("Message content too long");
    }
    Ok(())
}

/// Both directions of the thread between `a` and `b`.
pub fn thread_filter(a: ObjectId, b: ObjectId) -> Document {
    doc! {
        "$or": [
            { "sender": a, "receiver": b },
            { "sender": b, "receiver": a },
        ]
    }
}

/// Groups every message touching `user` by counterpart, keeping the newest message
/// as the summary and counting unread messages addressed to `user`.
pub fn conversations_pipeline(user: ObjectId) -> Vec<Document> {
    vec![
        doc! { "$match": { "$or": [{ "sender": user }, { "receiver": user }] } },
        doc! { "$sort": { "timestamp": -1 } },
        doc! { "$group": {
            "_id": { "$cond": [{ "$eq": ["$sender", user] }, "$receiver", "$sender"] },
            "lastMessage": { "$first": "$content" },
            "lastMessageAt": { "$first": "$timestamp" },
            "unreadCount": { "$sum": {
                "$cond": [
                    { "$and": [{ "$eq": ["$receiver", user] }, { "$eq": ["$read", false] }] },
                    1_i64,
                    0_i64,
                ]
            }},
        }},
        doc! { "$lookup": {
            "from": USERS,
            "localField": "_id",
            "foreignField": "_id",
            "as": "counterpart",
        }},
        doc! { "$unwind": "$counterpart" },
        doc! { "$project": {
            "_id": 0,
            "userId": "$_id",
            "username": "$counterpart.username",
            "profileImage": "$counterpart.profileImage",
            "lastMessage": 1,
            "lastMessageAt": 1,
            "unreadCount": 1,
        }},
        doc! { "$sort": { "lastMessageAt": -1 } },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::Bson;

    #[test]
    fn content_length_boundary() {
        assert!(validate_content(&"a".repeat(1000)).is_ok());
        assert_eq!(
            validate_content(&"a".repeat(1001)),
            Err("Message content too long")
        );
    }

    #[test]
    fn content_length_counts_characters() {
        assert!(validate_content(&"é".repeat(1000)).is_ok());
    }

    #[test]
    fn blank_content_is_rejected() {
        assert!(validate_content("   ").is_err());
        assert!(validate_content("").is_err());
    }

    #[test]
    fn thread_filter_is_symmetric() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let clauses = |d: Document| -> Vec<Bson> {
            let mut v = d.get_array("$or").unwrap().clone();
            v.sort_by_key(|c| c.to_string());
            v
        };
        assert_eq!(clauses(thread_filter(a, b)), clauses(thread_filter(b, a)));
    }

    #[test]
    fn conversations_group_by_counterpart() {
        let me = ObjectId::new();
        let pipeline = conversations_pipeline(me);
        let group = pipeline[2].get_document("$group").unwrap();
        let cond = group
            .get_document("_id")
            .unwrap()
            .get_array("$cond")
            .unwrap();
        assert_eq!(cond[1], Bson::String("$receiver".into()));
        assert_eq!(cond[2], Bson::String("$sender".into()));
    }

    #[test]
    fn conversation_rows_become_views() {
        let other = ObjectId::new();
        let row: ConversationRow = mongodb::bson::from_document(doc! {
            "userId": other,
            "username": "bob",
            "profileImage": "b.png",
            "lastMessage": "see you",
            "lastMessageAt": BsonDateTime::now(),
            "unreadCount": 3_i64,
        })
        .unwrap();
        let view = ConversationView::from(row);
        assert_eq!(view.user_id, other.to_hex());
        assert_eq!(view.unread_count, 3);
    }
}
