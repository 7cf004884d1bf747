//! Client for the fine-tuned persona model.
//!
//! The model is served behind an OpenAI-compatible `chat/completions`
//! endpoint. The persona label travels as the system message; the drained
//! batch is the user message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chatbot::debounce::ReplyGenerator;

/// One reply should fit a chat bubble, not an essay.
const MAX_REPLY_TOKENS: u32 = 256;

pub struct ModelClient {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl ModelClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            http: reqwest::Client::new(),
        }
    }

    fn persona_prompt(label: &str) -> String {
        format!(
            "You are texting as yourself with a contact labeled \"{label}\". \
             Answer the way you always write in this chat: same tone, same \
             length, no assistant mannerisms."
        )
    }

    pub async fn complete(&self, label: &str, text: &str) -> Result<String, Error> {
        let system = Self::persona_prompt(label);
        let request = ApiRequest {
            model: &self.model,
            max_tokens: MAX_REPLY_TOKENS,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: &system,
                },
                ApiMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(Error::Empty)
    }
}

#[async_trait]
impl ReplyGenerator for ModelClient {
    async fn generate(&self, label: &str, text: &str) -> Result<String, String> {
        self.complete(label, text).await.map_err(|e| e.to_string())
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_label_as_system_message() {
        let system = ModelClient::persona_prompt("friend");
        let request = ApiRequest {
            model: "persona-ft",
            max_tokens: MAX_REPLY_TOKENS,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: &system,
                },
                ApiMessage {
                    role: "user",
                    content: "hi\nhow are you",
                },
            ],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "persona-ft");
        assert_eq!(value["messages"][0]["role"], "system");
        assert!(value["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("friend"));
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "hi\nhow are you");
    }

    #[test]
    fn parses_completion_response() {
        let body = r#"{
            "choices": [
                { "message": { "role": "assistant", "content": "ну привет" } }
            ]
        }"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "ну привет");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
