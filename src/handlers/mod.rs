pub mod chat;
pub mod conversations;
pub mod files;
