use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::retry::{RetryPolicy, is_retryable, retry_after};
use super::{ToolSpec, parse_translations, system_prompt, translation_tool};
use crate::pipeline::{BatchTranslator, StageFuture};
use crate::settings::Settings;

/// Translator for any OpenAI-compatible `chat/completions` endpoint. The
/// model is forced to answer through a single tool call so the reply is
/// structured JSON rather than free text.
#[derive(Debug, Clone)]
pub struct OpenAiTranslator {
    client: reqwest::Client,
    url: String,
    key: String,
    model: String,
    source_language: String,
    target_language: String,
    retry: RetryPolicy,
}

impl OpenAiTranslator {
    /// Reads the API key from the environment variable named in settings.
    pub fn new(settings: &Settings) -> Result<Self> {
        let key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("missing API key: set {}", settings.api_key_env))?;
        Self::with_key(settings, key)
    }

    pub fn with_key(settings: &Settings, key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .with_context(|| "failed to build HTTP client")?;
        Ok(Self::with_client(settings, key.into(), client))
    }

    fn with_client(settings: &Settings, key: String, client: reqwest::Client) -> Self {
        Self {
            client,
            url: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            key,
            model: settings.model.clone(),
            source_language: settings.source_language.clone(),
            target_language: settings.target_language.clone(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(&self, tool: &ToolSpec, texts: &[String]) -> Result<Value> {
        let input = serde_json::to_string(texts)?;
        Ok(json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt(&self.source_language, &self.target_language)},
                {"role": "user", "content": input}
            ],
            "tools": [
                {
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters
                    }
                }
            ],
            "tool_choice": {"type": "function", "function": {"name": tool.name}}
        }))
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<String>> {
        let tool = translation_tool();
        let body = self.request_body(&tool, texts)?;
        debug!("translating batch of {} strings", texts.len());

        let mut attempt = 0usize;
        let mut delay = self.retry.base_delay;
        loop {
            attempt += 1;
            let response = match self
                .client
                .post(&self.url)
                .bearer_auth(&self.key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err)
                    if (err.is_timeout() || err.is_connect())
                        && attempt < self.retry.max_attempts =>
                {
                    let reason = if err.is_timeout() { "timed out" } else { "could not connect" };
                    delay = self.retry.wait(attempt, delay, None, reason).await;
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("translation request to {} failed", self.url));
                }
            };

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response
                .text()
                .await
                .with_context(|| format!("failed to read translation response from {}", self.url))?;
            if status.is_success() {
                let args = extract_tool_arguments(&text, &tool.name)?;
                return parse_translations(args, texts.len());
            }
            if is_retryable(status, &text) && attempt < self.retry.max_attempts {
                delay = self
                    .retry
                    .wait(attempt, delay, retry_after, "was throttled")
                    .await;
                continue;
            }
            return Err(anyhow!(
                "translation API error ({}): {}",
                status,
                extract_api_error(&text).unwrap_or(text)
            ));
        }
    }
}

impl BatchTranslator for OpenAiTranslator {
    fn translate_batch<'a>(&'a self, texts: &'a [String]) -> StageFuture<'a, Vec<String>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            self.call(texts).await
        })
    }
}

fn extract_tool_arguments(text: &str, tool_name: &str) -> Result<Value> {
    let payload: ChatResponse =
        serde_json::from_str(text).with_context(|| "failed to parse translation response JSON")?;
    let tool_call = payload
        .choices
        .first()
        .and_then(|choice| choice.message.tool_calls.first())
        .ok_or_else(|| anyhow!("no tool call in translation response"))?;
    if tool_call.function.name != tool_name {
        return Err(anyhow!(
            "unexpected tool name '{}' in translation response",
            tool_call.function.name
        ));
    }
    serde_json::from_str(&tool_call.function.arguments)
        .with_context(|| "failed to parse translation tool arguments")
}

fn extract_api_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ApiError>,
    }

    #[derive(Deserialize)]
    struct ApiError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let parts = [error.message, error.kind.map(|kind| format!("type: {}", kind))]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::load_settings_from;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const TOOL_REPLY: &str = r#"{"choices":[{"message":{"tool_calls":[{"function":{"name":"deliver_translations","arguments":"{\"translations\":[\"Hello\",\"Wait!\"]}"}}]}}]}"#;

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Serves one canned response per connection and counts requests.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        serve_with(responses, str::len)
    }

    /// Like [`serve`], but advertises `declared_len(body)` bytes and closes
    /// the connection after the actual body.
    fn serve_with(
        responses: Vec<(u16, &'static str)>,
        declared_len: fn(&str) -> usize,
    ) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut reader = BufReader::new(stream);
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(value) = lower.strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                let mut request_body = vec![0u8; content_length];
                reader.read_exact(&mut request_body).ok();
                let mut stream = reader.into_inner();
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    declared_len(body),
                    body
                );
                stream.write_all(reply.as_bytes()).ok();
            }
        });
        (base_url, hits)
    }

    fn translator(base_url: &str) -> OpenAiTranslator {
        let mut settings = load_settings_from(&[]).expect("settings");
        settings.base_url = base_url.to_string();
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("client");
        OpenAiTranslator::with_client(&settings, "test-key".to_string(), client).with_retry(no_wait())
    }

    fn batch() -> Vec<String> {
        vec!["こんにちは".to_string(), "待って！".to_string()]
    }

    #[test]
    fn tool_arguments_are_extracted() {
        let args = extract_tool_arguments(TOOL_REPLY, "deliver_translations").expect("args");
        assert_eq!(args, json!({"translations": ["Hello", "Wait!"]}));
    }

    #[test]
    fn other_tool_names_are_rejected() {
        assert!(extract_tool_arguments(TOOL_REPLY, "something_else").is_err());
    }

    #[test]
    fn api_error_message_is_summarised() {
        let body = r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error"}}"#;
        assert_eq!(
            extract_api_error(body).as_deref(),
            Some("Incorrect API key | type: invalid_request_error")
        );
        assert_eq!(extract_api_error("not json"), None);
    }

    #[test]
    fn request_forces_the_translation_tool() {
        let translator = translator("http://127.0.0.1:9");
        let body = translator
            .request_body(&translation_tool(), &batch())
            .expect("body");
        assert_eq!(body["tool_choice"]["function"]["name"], "deliver_translations");
        assert_eq!(body["messages"][1]["content"], r#"["こんにちは","待って！"]"#);
        assert_eq!(body["model"], "gpt-4o-mini");
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let (base_url, hits) = serve(vec![(200, TOOL_REPLY)]);
        let translator = translator(&base_url);
        let result = translator.translate_batch(&[]).await.expect("empty");
        assert!(result.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn throttled_request_is_retried() {
        let (base_url, hits) = serve(vec![
            (429, r#"{"error":{"message":"Rate limit reached"}}"#),
            (200, TOOL_REPLY),
        ]);
        let translator = translator(&base_url);
        let texts = batch();
        let result = translator.translate_batch(&texts).await.expect("translated");
        assert_eq!(result, vec!["Hello".to_string(), "Wait!".to_string()]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_fail_immediately() {
        let (base_url, hits) = serve(vec![(
            401,
            r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error"}}"#,
        )]);
        let translator = translator(&base_url);
        let texts = batch();
        let err = translator.translate_batch(&texts).await.expect_err("401");
        assert!(err.to_string().contains("Incorrect API key"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_reply_is_an_error() {
        let reply = r#"{"choices":[{"message":{"tool_calls":[{"function":{"name":"deliver_translations","arguments":"{\"translations\":[\"Hello\"]}"}}]}}]}"#;
        let (base_url, _) = serve(vec![(200, reply)]);
        let translator = translator(&base_url);
        let texts = batch();
        let err = translator.translate_batch(&texts).await.expect_err("mismatch");
        assert!(err.to_string().contains("count mismatch"));
    }

    #[tokio::test]
    async fn truncated_body_is_a_read_error() {
        let (base_url, hits) = serve_with(vec![(200, TOOL_REPLY)], |body| body.len() + 64);
        let translator = translator(&base_url);
        let texts = batch();
        let err = translator.translate_batch(&texts).await.expect_err("truncated");
        let message = format!("{:#}", err);
        assert!(message.contains("failed to read translation response"), "{}", message);
        assert!(!message.contains("failed to parse translation response JSON"), "{}", message);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
