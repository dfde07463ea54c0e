//! Comment threads (resolvables)

use serde_json::{Value, json};
use tracing::info;

use super::{CodecksClient, created_id};
use crate::{
    Result,
    security::{validate_identifier, validate_text},
};

impl CodecksClient {
    /// Open a new comment thread on a card
    pub async fn create_comment(&self, card_id: &str, content: &str) -> Result<Value> {
        let card_id = validate_identifier(card_id)?;
        let content = validate_text(content, "comment")?;
        let user_id = self.user_id()?;

        let result = self
            .dispatch(
                "resolvables/create",
                json!({
                    "cardId": card_id,
                    "userId": user_id,
                    "content": content,
                    "context": "comment",
                }),
            )
            .await?;
        let thread_id = created_id(&result)?;
        info!(card_id, thread_id = %thread_id, "Opened comment thread");
        Ok(json!({"card_id": card_id, "thread_id": thread_id}))
    }

    /// Reply to an existing thread
    pub async fn reply_comment(&self, thread_id: &str, content: &str) -> Result<Value> {
        let thread_id = validate_identifier(thread_id)?;
        let content = validate_text(content, "comment")?;
        let user_id = self.user_id()?;

        self.dispatch(
            "resolvables/comment",
            json!({"resolvableId": thread_id, "authorId": user_id, "content": content}),
        )
        .await?;
        Ok(json!({"thread_id": thread_id, "replied": true}))
    }

    /// Close a thread
    pub async fn close_comment(&self, thread_id: &str, card_id: &str) -> Result<Value> {
        self.set_thread_closed(thread_id, card_id, true).await
    }

    /// Reopen a closed thread
    pub async fn reopen_comment(&self, thread_id: &str, card_id: &str) -> Result<Value> {
        self.set_thread_closed(thread_id, card_id, false).await
    }

    async fn set_thread_closed(
        &self,
        thread_id: &str,
        card_id: &str,
        closed: bool,
    ) -> Result<Value> {
        let thread_id = validate_identifier(thread_id)?;
        let card_id = validate_identifier(card_id)?;
        let user_id = self.user_id()?;

        let path = if closed {
            "resolvables/close"
        } else {
            "resolvables/reopen"
        };
        self.dispatch(
            path,
            json!({"id": thread_id, "cardId": card_id, "isClosed": closed, "closedBy": user_id}),
        )
        .await?;
        Ok(json!({"thread_id": thread_id, "is_closed": closed}))
    }
}
