use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Prompt sent upstream when the last message carries no content at all.
pub const DEFAULT_PROMPT: &str = "你好";

/// `OpenAI` Chat Completion request wire type.
///
/// Only the fields the gateway acts on are modelled; everything else
/// (temperature, tools, ...) is accepted and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

/// Message content: plain string or array of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One element of an array-form message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ChatRequest {
    /// Parse a request body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for malformed JSON or an empty
    /// `messages` array.
    pub fn from_slice(body: &[u8]) -> Result<Self, GatewayError> {
        let request: ChatRequest = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidRequest(format!("Invalid JSON body: {e}")))?;
        if request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must contain at least one message".to_string(),
            ));
        }
        Ok(request)
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Model name echoed on every response object.
    #[must_use]
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(default)
    }

    /// Text of the last message, which is all the backend receives; it keeps
    /// the conversation history itself.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when there are no messages.
    pub fn prompt(&self) -> Result<Cow<'_, str>, GatewayError> {
        let last = self.messages.last().ok_or_else(|| {
            GatewayError::InvalidRequest("messages must contain at least one message".to_string())
        })?;
        Ok(match &last.content {
            None => Cow::Borrowed(DEFAULT_PROMPT),
            Some(MessageContent::Text(text)) => Cow::Borrowed(text.as_str()),
            Some(MessageContent::Parts(parts)) => {
                let mut texts = parts
                    .iter()
                    .filter(|part| part.kind == "text")
                    .filter_map(|part| part.text.as_deref());
                match (texts.next(), texts.next()) {
                    (None, _) => Cow::Borrowed(""),
                    (Some(only), None) => Cow::Borrowed(only),
                    (Some(first), Some(second)) => {
                        let mut joined = String::with_capacity(first.len() + second.len() + 1);
                        joined.push_str(first);
                        joined.push('\n');
                        joined.push_str(second);
                        for text in texts {
                            joined.push('\n');
                            joined.push_str(text);
                        }
                        Cow::Owned(joined)
                    }
                }
            }
        })
    }
}

/// `OpenAI` Chat Completion (non-streaming) response wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

impl ChatCompletion {
    #[must_use]
    pub fn assistant_text(id: String, model: String, created: u64, content: String) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: "stop".to_string(),
            }],
        }
    }
}

/// `OpenAI` streaming chunk, as seen by clients.
///
/// The gateway writes chunks by hand on the hot path (see
/// `stream::encoder`); this type is the parsing counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Model entry in the `/v1/models` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub owned_by: String,
}

/// `OpenAI` model-list envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    #[must_use]
    pub fn from_ids<'a>(ids: impl IntoIterator<Item = &'a str>, created: u64) -> Self {
        Self {
            object: "list".to_string(),
            data: ids
                .into_iter()
                .map(|id| ModelCard {
                    id: id.to_string(),
                    object: "model".to_string(),
                    created,
                    owned_by: "system".to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_request() {
        let req = ChatRequest::from_slice(
            br#"{"model":"spark-pro","messages":[{"role":"user","content":"ping"}],"stream":true}"#,
        )
        .unwrap();
        assert!(req.is_stream());
        assert_eq!(req.model_or("spark-3.5-max"), "spark-pro");
        assert_eq!(req.prompt().unwrap(), "ping");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let req = ChatRequest::from_slice(
            br#"{"messages":[{"role":"user","content":"x","name":"n"}],"temperature":0.2,"tools":[]}"#,
        )
        .unwrap();
        assert!(!req.is_stream());
    }

    #[test]
    fn test_stream_null_means_false() {
        let req =
            ChatRequest::from_slice(br#"{"messages":[{"role":"user","content":"x"}],"stream":null}"#)
                .unwrap();
        assert!(!req.is_stream());
    }

    #[test]
    fn test_empty_messages_rejected() {
        let err = ChatRequest::from_slice(br#"{"model":"m","messages":[]}"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        let err = ChatRequest::from_slice(br#"{"model":"m"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = ChatRequest::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(msg) if msg.starts_with("Invalid JSON")));
    }

    #[test]
    fn test_model_defaults_when_blank() {
        let req =
            ChatRequest::from_slice(br#"{"model":"  ","messages":[{"role":"user","content":"x"}]}"#)
                .unwrap();
        assert_eq!(req.model_or("spark-3.5-max"), "spark-3.5-max");
    }

    #[test]
    fn test_prompt_uses_last_message() {
        let req = ChatRequest::from_slice(
            br#"{"messages":[{"role":"system","content":"be brief"},{"role":"user","content":"first"},{"role":"assistant","content":"ok"},{"role":"user","content":"second"}]}"#,
        )
        .unwrap();
        assert_eq!(req.prompt().unwrap(), "second");
    }

    #[test]
    fn test_prompt_defaults_when_content_missing() {
        let req = ChatRequest::from_slice(br#"{"messages":[{"role":"user"}]}"#).unwrap();
        assert_eq!(req.prompt().unwrap(), DEFAULT_PROMPT);
        let req =
            ChatRequest::from_slice(br#"{"messages":[{"role":"user","content":null}]}"#).unwrap();
        assert_eq!(req.prompt().unwrap(), DEFAULT_PROMPT);
    }

    #[test]
    fn test_prompt_joins_text_parts() {
        let req = ChatRequest::from_slice(
            br#"{"messages":[{"role":"user","content":[{"type":"text","text":"a"},{"type":"image_url","image_url":{"url":"x"}},{"type":"text","text":"b"},{"type":"text","text":"c"}]}]}"#,
        )
        .unwrap();
        assert_eq!(req.prompt().unwrap(), "a\nb\nc");
    }

    #[test]
    fn test_completion_shape() {
        let completion = ChatCompletion::assistant_text(
            "chatcmpl-1".to_string(),
            "spark-lite".to_string(),
            1_727_000_000,
            "你好".to_string(),
        );
        let value = serde_json::to_value(&completion).unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["choices"][0]["message"]["content"], "你好");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert!(value.get("usage").is_none());
    }

    #[test]
    fn test_model_list_shape() {
        let list = ModelList::from_ids(["spark-pro", "spark-lite"], 1_700_000_000);
        let value = serde_json::to_value(&list).unwrap();
        assert_eq!(value["object"], "list");
        assert_eq!(value["data"][1]["id"], "spark-lite");
        assert_eq!(value["data"][0]["owned_by"], "system");
        assert_eq!(value["data"][0]["object"], "model");
    }
}
