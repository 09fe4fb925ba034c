use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::chat::{Message, DEFAULT_TITLE};

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant. You can discuss text, analyze documents, \
describe images, and answer questions about uploaded files. Be concise, accurate, and helpful. \
When analyzing files, reference specific content from them.";

const TITLE_PROMPT: &str = "Generate a short title (max 6 words) for a conversation that starts \
with the following message. Reply with only the title, no quotes.";

/// History entries sent to the model per request; older context is dropped.
const HISTORY_WINDOW: usize = 20;
const MAX_COMPLETION_TOKENS: u32 = 4096;
const TITLE_MODEL: &str = "gpt-4o-mini";
const TITLE_INPUT_CAP: usize = 500;

#[derive(Debug, Error)]
pub enum OpenAiError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Build the full prompt: fixed system instruction, the most recent history
/// entries as plain role/content turns, then one user turn carrying extracted
/// file text, inline images, and the new message text — in that order.
pub fn build_messages(
    history: &[Message],
    user_message: &str,
    file_texts: &[(String, String)],
    image_data: &[String],
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system".to_string(),
        content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
    }];

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    for msg in &history[start..] {
        messages.push(ChatMessage {
            role: msg.role.clone(),
            content: MessageContent::Text(msg.content.clone()),
        });
    }

    let mut parts = Vec::new();
    for (filename, text) in file_texts {
        parts.push(ContentPart::Text {
            text: format!("[File: {}]\n{}", filename, text),
        });
    }
    for data_uri in image_data {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: data_uri.clone(),
                detail: "auto".to_string(),
            },
        });
    }
    parts.push(ContentPart::Text {
        text: user_message.to_string(),
    });

    messages.push(ChatMessage {
        role: "user".to_string(),
        content: MessageContent::Parts(parts),
    });
    messages
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model,
        }
    }

    /// Streaming completion. Yields each non-empty text fragment as the
    /// provider produces it; the stream ends at `[DONE]` or when the
    /// connection closes. Errors are surfaced to the caller unretried.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<impl Stream<Item = Result<String, OpenAiError>>, OpenAiError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: 0.7,
            stream: true,
        };

        let response = self.send_request(&request).await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OpenAiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut bytes = response.bytes_stream();

        Ok(async_stream::try_stream! {
            let mut buffer = String::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    if let Some(data) = line.strip_prefix("data: ") {
                        if data == "[DONE]" {
                            break 'read;
                        }
                        if let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) {
                            if let Some(choice) = parsed.choices.first() {
                                if let Some(content) = &choice.delta.content {
                                    if !content.is_empty() {
                                        yield content.clone();
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// One-shot completion. Returns the full text and the provider-reported
    /// total token count (0 when usage is omitted).
    pub async fn chat_complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<(String, i32), OpenAiError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: 0.7,
            stream: false,
        };

        let parsed = self.complete_request(&request).await?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);
        Ok((content, tokens))
    }

    /// Generate a short conversation title from the first user message using
    /// the cheaper model; input is capped at 500 characters.
    pub async fn generate_title(&self, first_message: &str) -> Result<String, OpenAiError> {
        let truncated: String = first_message.chars().take(TITLE_INPUT_CAP).collect();
        let request = ChatCompletionRequest {
            model: TITLE_MODEL.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: MessageContent::Text(TITLE_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: MessageContent::Text(truncated),
                },
            ],
            max_tokens: 20,
            temperature: 0.5,
            stream: false,
        };

        let parsed = self.complete_request(&request).await?;
        let title = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(if title.is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            title
        })
    }

    async fn send_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, OpenAiError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await?;
        Ok(response)
    }

    async fn complete_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, OpenAiError> {
        let response = self.send_request(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("OpenAI API error ({}): {}", status, body);
            return Err(OpenAiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| OpenAiError::Api {
            status: status.as_u16(),
            message: format!("failed to parse response: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Message;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> OpenAiClient {
        OpenAiClient {
            client: Client::new(),
            api_key: "test-key".to_string(),
            base_url: base_url.to_string(),
            model: "gpt-4o".to_string(),
        }
    }

    fn history_message(role: &str, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role: role.to_string(),
            content: content.to_string(),
            files: sqlx::types::Json(Vec::new()),
            token_count: 0,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn prompt_starts_with_system_and_ends_with_user_turn() {
        let history = vec![
            history_message("user", "hi"),
            history_message("assistant", "hello"),
        ];
        let messages = build_messages(&history, "what now?", &[], &[]);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3].role, "user");
        match &messages[3].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(&parts[0], ContentPart::Text { text } if text == "what now?"));
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn prompt_keeps_only_the_last_twenty_history_entries() {
        let history: Vec<Message> = (0..25)
            .map(|i| history_message("user", &format!("msg-{i}")))
            .collect();
        let messages = build_messages(&history, "latest", &[], &[]);

        // system + 20 history + 1 user turn
        assert_eq!(messages.len(), 22);
        match &messages[1].content {
            MessageContent::Text(text) => assert_eq!(text, "msg-5"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn user_turn_orders_file_text_then_images_then_message() {
        let file_texts = vec![("report.pdf".to_string(), "quarterly numbers".to_string())];
        let image_data = vec!["data:image/png;base64,AAAA".to_string()];
        let messages = build_messages(&[], "summarize", &file_texts, &image_data);

        let parts = match &messages.last().unwrap().content {
            MessageContent::Parts(parts) => parts,
            other => panic!("expected parts, got {:?}", other),
        };
        assert_eq!(parts.len(), 3);
        assert!(
            matches!(&parts[0], ContentPart::Text { text } if text == "[File: report.pdf]\nquarterly numbers")
        );
        assert!(
            matches!(&parts[1], ContentPart::ImageUrl { image_url } if image_url.url.starts_with("data:image/png"))
        );
        assert!(matches!(&parts[2], ContentPart::Text { text } if text == "summarize"));
    }

    #[tokio::test]
    async fn streams_fragments_until_done_marker() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let stream = client
            .chat_stream(build_messages(&[], "hi", &[], &[]))
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;

        // The empty delta is dropped, everything after [DONE] is ignored.
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn stream_surfaces_api_errors_to_the_caller() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.chat_stream(build_messages(&[], "hi", &[], &[])).await;

        match result {
            Err(OpenAiError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected API error, got {:?}", other.map(|_| "stream")),
        }
    }

    #[tokio::test]
    async fn completion_returns_content_and_token_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Hello there"}}],
                "usage": {"total_tokens": 42}
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let (content, tokens) = client
            .chat_complete(build_messages(&[], "hi", &[], &[]))
            .await
            .unwrap();
        assert_eq!(content, "Hello there");
        assert_eq!(tokens, 42);
    }

    #[tokio::test]
    async fn completion_reports_zero_tokens_when_usage_is_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Hi"}}]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let (_, tokens) = client
            .chat_complete(build_messages(&[], "hi", &[], &[]))
            .await
            .unwrap();
        assert_eq!(tokens, 0);
    }

    #[tokio::test]
    async fn title_generation_uses_the_small_model_and_trims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "  Rust Questions \n"}}]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let title = client.generate_title("how do lifetimes work?").await.unwrap();
        assert_eq!(title, "Rust Questions");
    }

    #[tokio::test]
    async fn title_falls_back_to_default_when_provider_returns_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": ""}}]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let title = client.generate_title("hello").await.unwrap();
        assert_eq!(title, DEFAULT_TITLE);
    }
}
