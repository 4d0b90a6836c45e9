use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{doc, from_document, oid::ObjectId, Document};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::message::{
    conversations_pipeline, thread_filter, validate_content, ConversationRow, ConversationView,
    Message, MessageView,
};
use crate::models::{now, parse_object_id, PageQuery};

pub const DEFAULT_THREAD_PAGE_SIZE: u64 = 20;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub content: String,
}

fn parse_pair(raw: &(String, String)) -> Result<(ObjectId, ObjectId), ApiError> {
    let a = ObjectId::parse_str(raw.0.trim());
    let b = ObjectId::parse_str(raw.1.trim());
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        _ => Err(ApiError::validation("Invalid user IDs")),
    }
}

/// GET /api/messages/{user_id1}/{user_id2}
///
/// Newest first; clients reverse a page for display.
pub async fn list_messages(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<(String, String)>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let (a, b) = parse_pair(&path)?;
    if user.id() != a && user.id() != b {
        return Err(ApiError::forbidden("Unauthorized access"));
    }
    let (_, limit, skip) = query.window(DEFAULT_THREAD_PAGE_SIZE);

    let messages: Vec<MessageView> = data
        .mongodb
        .messages()
        .find(thread_filter(a, b))
        .sort(doc! { "timestamp": -1, "_id": -1 })
        .skip(skip)
        .limit(limit as i64)
        .await?
        .map_ok(MessageView::from)
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /api/messages
pub async fn send_message(
    data: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.sender.trim().is_empty() || body.receiver.trim().is_empty() {
        return Err(ApiError::validation("Missing or invalid required fields"));
    }
    validate_content(&body.content).map_err(ApiError::validation)?;
    let (sender, receiver) = match parse_pair(&(body.sender, body.receiver)) {
        Ok(pair) => pair,
        Err(_) => return Err(ApiError::validation("Invalid sender or receiver ID")),
    };
    if sender != user.id() {
        return Err(ApiError::forbidden("Unauthorized sender"));
    }

    let message = Message {
        id: ObjectId::new(),
        sender,
        receiver,
        content: body.content,
        read: false,
        timestamp: now(),
    };
    data.mongodb.messages().insert_one(&message).await?;
    Ok(HttpResponse::Created().json(MessageView::from(message)))
}

/// GET /api/messages/conversations/{user_id}
pub async fn list_conversations(
    data: web::Data<AppState>,
    user: AuthUser,
    user_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let target = parse_object_id(&user_id, "user id")?;
    if target != user.id() {
        return Err(ApiError::forbidden("Unauthorized access"));
    }

    let rows: Vec<Document> = data
        .mongodb
        .messages()
        .aggregate(conversations_pipeline(target))
        .await?
        .try_collect()
        .await?;
    let conversations = rows
        .into_iter()
        .map(|row| Ok(from_document::<ConversationRow>(row)?.into()))
        .collect::<Result<Vec<ConversationView>, ApiError>>()?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// PUT /api/messages/mark-read/{user_id1}/{user_id2}
///
/// Marks everything `user_id2` sent to `user_id1` as read.
pub async fn mark_read(
    data: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (reader, counterpart) = parse_pair(&path)?;
    if reader != user.id() {
        return Err(ApiError::forbidden("Unauthorized access"));
    }

    let result = data
        .mongodb
        .messages()
        .update_many(
            doc! { "sender": counterpart, "receiver": reader, "read": false },
            doc! { "$set": { "read": true } },
        )
        .await?;
    info!(
        "{} message(s) from {} marked read by {}",
        result.modified_count, counterpart, reader
    );
    Ok(HttpResponse::Ok().json(json!({
        "message": "Messages marked as read",
        "modifiedCount": result.modified_count,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parsing_requires_two_object_ids() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_eq!(parse_pair(&(a.to_hex(), b.to_hex())).unwrap(), (a, b));
        let err = parse_pair(&(a.to_hex(), "nope".into())).unwrap_err();
        assert_eq!(err.to_string(), "Invalid user IDs");
    }

    #[test]
    fn send_request_tolerates_missing_fields() {
        let req: SendMessageRequest = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert!(req.sender.is_empty());
        assert!(req.receiver.is_empty());
    }
}
