use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::chat::{Conversation, Message, MessageRole, DEFAULT_TITLE};
use crate::models::file::{FileRef, StoredFile};

/// Cap applied when loading a conversation's history. Long conversations are
/// silently truncated to this many messages.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// CRUD over the conversations, messages, and files tables. Lookups with a
/// malformed identifier resolve to `None` rather than an error.
#[derive(Clone)]
pub struct ConversationStore {
    pool: PgPool,
}

impl ConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_conversation(
        &self,
        title: Option<String>,
    ) -> Result<Conversation, StoreError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (id, title, message_count, created_at, updated_at)
             VALUES ($1, $2, 0, NOW(), NOW())
             RETURNING id, title, message_count, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(title.unwrap_or_else(|| DEFAULT_TITLE.to_string()))
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, message_count, created_at, updated_at
             FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<Conversation>, i64), StoreError> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;

        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, message_count, created_at, updated_at
             FROM conversations
             ORDER BY updated_at DESC
             OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok((conversations, total.0))
    }

    pub async fn update_title(&self, id: Uuid, title: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET title = $1, updated_at = NOW() WHERE id = $2")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes the conversation's messages, then the conversation itself.
    /// File records are left in place.
    pub async fn delete_conversation(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Inserts the message and bumps the parent conversation's message_count
    /// and updated_at in the same transaction.
    pub async fn add_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        files: Vec<FileRef>,
        token_count: i32,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, conversation_id, role, content, files, token_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             RETURNING id, conversation_id, role, content, files, token_count, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(sqlx::types::Json(files))
        .bind(token_count)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations
             SET message_count = message_count + 1, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, role, content, files, token_count, created_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC
             LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn store_file(
        &self,
        conversation_id: Uuid,
        filename: &str,
        content_type: &str,
        size: i64,
        file_type: &str,
        extracted_text: Option<&str>,
        data: &[u8],
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO files (id, conversation_id, filename, content_type, size, file_type, extracted_text, data, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(filename)
        .bind(content_type)
        .bind(size)
        .bind(file_type)
        .bind(extracted_text)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_file(&self, id: &str) -> Result<Option<StoredFile>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let file = sqlx::query_as::<_, StoredFile>(
            "SELECT id, conversation_id, filename, content_type, size, file_type, extracted_text, created_at
             FROM files WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    pub async fn get_file_data(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as("SELECT data FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(data,)| data))
    }
}
