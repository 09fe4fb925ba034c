use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Classified upload kind. Anything that is not a recognized document format
/// is treated as an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Docx,
    Xlsx,
    Image,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Xlsx => "xlsx",
            FileType::Image => "image",
        }
    }
}

/// File summary embedded in a message's `files` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub file_type: String,
    pub file_id: String,
}

/// File record without the raw payload; the payload is fetched separately so
/// metadata queries never drag the blob along.
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct StoredFile {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub file_type: String,
    pub extracted_text: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
