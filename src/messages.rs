use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::config::*;
use crate::core::context::AppContext;
use crate::core::db::{best_effort, with_retry, JsonStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    add_unique, json_response, new_id, normalize_id, now_iso, parse_json_body, require_id, sanitize_text,
};
use crate::models::models::{Conversation, Message, MessageRequest};
use crate::users::load_user;

/// Participants in canonical order.
fn participant_pair(a: &str, b: &str) -> [String; 2] {
    if a <= b {
        [a.to_string(), b.to_string()]
    } else {
        [b.to_string(), a.to_string()]
    }
}

/// The conversation id for an unordered pair. Both directions, and any two
/// racing creators, land on the same document.
pub fn conversation_id(a: &str, b: &str) -> String {
    let [first, second] = participant_pair(a, b);
    let name = format!("{}:{}", first, second);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

fn find_or_create_conversation(ctx: &AppContext, a: &str, b: &str) -> Result<Conversation, ApiError> {
    let store = ctx.store();
    let id = conversation_id(a, b);
    let key = conversation_key(&id);

    if let Some(existing) = store.get_json::<Conversation>(&key)? {
        return Ok(existing);
    }

    let conversation = Conversation {
        id,
        participants: participant_pair(a, b),
        messages: Vec::new(),
        created_at: now_iso(),
    };
    with_retry("create conversation", || {
        // Never clobber one created meanwhile.
        if store.get_json::<Conversation>(&key)?.is_none() {
            store.set_json(&key, &conversation)?;
        }
        Ok(())
    })?;
    tracing::info!(conversation_id = %conversation.id, "conversation started");
    Ok(conversation)
}

/// Sends `text` from `sender_id` to `raw_receiver`. The message is written
/// first and deleted again if it cannot be appended to the conversation.
pub fn send_message(ctx: &AppContext, sender_id: &str, raw_receiver: &str, text: &str) -> Result<Message, ApiError> {
    let receiver_id = require_id(raw_receiver, "User")?;
    if receiver_id == sender_id {
        return Err(ApiError::validation("You cannot message yourself"));
    }
    let text = sanitize_text(text);
    if text.is_empty() {
        return Err(ApiError::validation("message is required"));
    }
    if text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::validation("Message too long (max 5000 chars)"));
    }
    if load_user(ctx, &receiver_id)?.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    let conversation = find_or_create_conversation(ctx, sender_id, &receiver_id)?;
    let store = ctx.store();

    let message = Message {
        id: new_id(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.clone(),
        message: text,
        created_at: now_iso(),
    };
    with_retry("write message", || store.set_json(&message_key(&message.id), &message))?;

    let linked = with_retry("append message", || {
        store.update_json(&conversation_key(&conversation.id), |c: &mut Conversation| {
            add_unique(&mut c.messages, &message.id);
        })
    });
    let failure = match linked {
        Ok(Some(())) => None,
        Ok(None) => Some(ApiError::Unavailable("conversation vanished while sending".to_string())),
        Err(err) => Some(err.into()),
    };
    if let Some(err) = failure {
        tracing::warn!(message_id = %message.id, "append failed, removing unlinked message");
        best_effort("remove unlinked message", || store.delete(&message_key(&message.id)));
        return Err(err);
    }

    tracing::info!(message_id = %message.id, conversation_id = %conversation.id, "message sent");
    Ok(message)
}

/// The message history between two users in send order. No conversation
/// yet, or an id that cannot name a user, means an empty history.
pub fn get_messages(ctx: &AppContext, caller_id: &str, raw_other: &str) -> Result<Vec<Message>, ApiError> {
    let Some(other_id) = normalize_id(raw_other) else {
        return Ok(Vec::new());
    };
    let store = ctx.store();

    let Some(conversation) = store.get_json::<Conversation>(&conversation_key(&conversation_id(caller_id, &other_id)))?
    else {
        return Ok(Vec::new());
    };

    let mut messages = Vec::with_capacity(conversation.messages.len());
    for id in &conversation.messages {
        match store.get_json::<Message>(&message_key(id))? {
            Some(message) => messages.push(message),
            None => tracing::warn!(message_id = %id, "conversation lists a missing message"),
        }
    }
    Ok(messages)
}

// === HTTP Handlers ===

pub fn handle_send_message(
    ctx: &AppContext,
    req: &Request,
    caller_id: &str,
    raw_receiver: &str,
) -> Result<Response, ApiError> {
    let request: MessageRequest = parse_json_body(req.body())?;
    let message = send_message(ctx, caller_id, raw_receiver, &request.message)?;
    json_response(201, &serde_json::json!({ "success": true, "newMessage": message }))
}

pub fn handle_get_messages(ctx: &AppContext, caller_id: &str, raw_other: &str) -> Result<Response, ApiError> {
    let messages = get_messages(ctx, caller_id, raw_other)?;
    json_response(200, &serde_json::json!({ "success": true, "messages": messages }))
}
