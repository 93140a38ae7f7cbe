//! The slice of Bot API objects the service reads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl CallbackQuery {
    /// Chat to answer in: the message's chat, or the user's private chat.
    pub fn chat_id(&self) -> i64 {
        self.message.as_ref().map(|m| m.chat.id).unwrap_or(self.from.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_callback_update() {
        let raw = r#"{
            "update_id": 10,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 42, "is_bot": false, "first_name": "Ann"},
                "message": {"message_id": 7, "date": 0, "chat": {"id": -100, "type": "private"}},
                "data": "processed:5"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let query = update.callback_query.unwrap();
        assert_eq!(query.data.as_deref(), Some("processed:5"));
        assert_eq!(query.chat_id(), -100);
    }

    #[test]
    fn other_updates_have_no_callback() {
        let update: Update = serde_json::from_str(r#"{"update_id": 1, "message": {}}"#).unwrap();
        assert!(update.callback_query.is_none());
    }
}
