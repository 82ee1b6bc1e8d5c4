//! Client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! With a partial-result callback the client streams (`text/event-stream`)
//! and reports the accumulated text after every delta. If the stream yields
//! no text at all it silently retries as a single blocking request.

use crate::config::Settings;
use crate::error::{self, ApiError};
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const TEMPERATURE: f32 = 0.1;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BLOCKING_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Built from the settings snapshot at trigger time; never re-read mid-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub base_url: String,
    pub model: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, settings: &Settings) -> Self {
        Self {
            text: text.into(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            source_lang: settings.source_lang.clone(),
            target_lang: settings.target_lang.clone(),
        }
    }

    fn endpoint(&self) -> Result<String, ApiError> {
        let base = self.base_url.trim();
        match url::Url::parse(base) {
            Ok(u) if u.has_host() => Ok(format!("{}/chat/completions", base.trim_end_matches('/'))),
            _ => Err(ApiError::InvalidBaseUrl(self.base_url.clone())),
        }
    }

    fn prompt(&self) -> String {
        format!(
            "Translate the following segment into {} language, without additional explanation.\n\n{}",
            self.target_lang, self.text
        )
    }
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(serde::Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(serde::Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(serde::Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build()
}

/// Translate `req.text` into `req.target_lang`. The result is trimmed.
pub async fn translate(
    client: &reqwest::Client,
    req: &TranslationRequest,
    on_partial: Option<&mut dyn FnMut(&str)>,
) -> Result<String, ApiError> {
    let url = req.endpoint()?;
    let prompt = req.prompt();
    info!("POST {} (model {}, {} chars)", url, req.model, req.text.chars().count());

    if let Some(on_partial) = on_partial {
        match stream_chat(client, &url, req, &prompt, on_partial).await? {
            StreamOutcome::Complete(text) => return Ok(text.trim().to_string()),
            StreamOutcome::Unusable(reason) => {
                info!("Streaming unavailable ({}); falling back to blocking request", reason)
            }
        }
    }
    blocking_chat(client, &url, req, &prompt).await
}

fn chat_body<'a>(req: &'a TranslationRequest, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
    ChatRequest {
        model: &req.model,
        messages: vec![ChatMessage { role: "user", content: prompt }],
        temperature: TEMPERATURE,
        stream,
    }
}

async fn blocking_chat(
    client: &reqwest::Client,
    url: &str,
    req: &TranslationRequest,
    prompt: &str,
) -> Result<String, ApiError> {
    let resp = client
        .post(url)
        .timeout(BLOCKING_TIMEOUT)
        .json(&chat_body(req, prompt, false))
        .send()
        .await?;
    info!("Response status: {}", resp.status());
    if !resp.status().is_success() {
        return Err(error::from_response(resp, Some(&req.model)).await);
    }

    let parsed: ChatResponse = resp
        .json()
        .await
        .map_err(|e| ApiError::Malformed(e.to_string()))?;
    let out = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Malformed("no choices in response".into()))?
        .message
        .content
        .unwrap_or_default();
    Ok(out.trim().to_string())
}

enum StreamOutcome {
    Complete(String),
    /// Nothing usable arrived; the caller may fall back.
    Unusable(String),
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Skip,
    Done,
    Delta(Option<String>),
    Malformed,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return SseLine::Skip;
    }
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => SseLine::Delta(chunk.choices.into_iter().next().and_then(|c| c.delta.content)),
        Err(_) => SseLine::Malformed,
    }
}

/// Accumulates deltas and decides when the stream stops.
struct Accumulator<'a> {
    text: String,
    on_partial: &'a mut dyn FnMut(&str),
}

enum Step {
    Continue,
    Stop(Result<StreamOutcome, ApiError>),
}

impl Accumulator<'_> {
    fn line(&mut self, raw: &[u8]) -> Step {
        let line = String::from_utf8_lossy(raw);
        match parse_sse_line(&line) {
            SseLine::Skip | SseLine::Delta(None) => Step::Continue,
            SseLine::Delta(Some(delta)) => {
                if !delta.is_empty() {
                    self.text.push_str(&delta);
                    (self.on_partial)(&self.text);
                }
                Step::Continue
            }
            SseLine::Done => Step::Stop(Ok(self.finish("no content before [DONE]"))),
            SseLine::Malformed => {
                debug!("Malformed stream event: {:?}", line);
                if self.text.is_empty() {
                    Step::Stop(Ok(StreamOutcome::Unusable("malformed event".into())))
                } else {
                    Step::Stop(Err(ApiError::Malformed(format!("stream event {:?}", line))))
                }
            }
        }
    }

    fn finish(&mut self, empty_reason: &str) -> StreamOutcome {
        if self.text.is_empty() {
            StreamOutcome::Unusable(empty_reason.to_string())
        } else {
            StreamOutcome::Complete(std::mem::take(&mut self.text))
        }
    }
}

async fn stream_chat(
    client: &reqwest::Client,
    url: &str,
    req: &TranslationRequest,
    prompt: &str,
    on_partial: &mut dyn FnMut(&str),
) -> Result<StreamOutcome, ApiError> {
    let resp = match client
        .post(url)
        .timeout(STREAM_TIMEOUT)
        .json(&chat_body(req, prompt, true))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => return Ok(StreamOutcome::Unusable(format!("request failed: {}", e))),
    };
    if !resp.status().is_success() {
        return Ok(StreamOutcome::Unusable(format!("HTTP {}", resp.status())));
    }
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains("text/event-stream") {
        return Ok(StreamOutcome::Unusable(format!("content type {:?}", content_type)));
    }

    let mut acc = Accumulator { text: String::new(), on_partial };
    let mut pending: Vec<u8> = Vec::new();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) if acc.text.is_empty() => {
                return Ok(StreamOutcome::Unusable(format!("stream error: {}", e)))
            }
            Err(e) => {
                warn!("Stream broke after {} chars: {}", acc.text.len(), e);
                return Err(ApiError::Http(e));
            }
        };
        pending.extend_from_slice(&chunk);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            if let Step::Stop(result) = acc.line(&line[..line.len() - 1]) {
                return result;
            }
        }
    }
    if !pending.is_empty() {
        if let Step::Stop(result) = acc.line(&pending) {
            return result;
        }
    }
    Ok(acc.finish("stream ended without content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, Reply};
    use serde_json::json;

    fn request(base_url: &str) -> TranslationRequest {
        TranslationRequest {
            text: "Hello there".into(),
            base_url: base_url.into(),
            model: "llama3".into(),
            source_lang: "English".into(),
            target_lang: "French".into(),
        }
    }

    fn completion(content: &str) -> Reply {
        Reply::json(200, json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
    }

    fn is_stream(body: &serde_json::Value) -> bool {
        body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false)
    }

    #[test]
    fn sse_line_classification() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: ping"), SseLine::Skip);
        assert_eq!(parse_sse_line("data: {oops"), SseLine::Malformed);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Delta(None)
        );
        assert_eq!(
            parse_sse_line("data: {\"choices\":[{\"delta\":{\"content\":\"Bon\"}}]}\r"),
            SseLine::Delta(Some("Bon".into()))
        );
    }

    #[tokio::test]
    async fn streaming_deltas_are_accumulated_in_order() {
        let server = serve(|req| {
            assert!(is_stream(&req.json()));
            Reply::sse(&[
                r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
                r#"data: {"choices":[{"delta":{"content":"Bon"}}]}"#,
                r#"data: {"choices":[{"delta":{"content":"jour"}}]}"#,
                r#"data: {"choices":[{"delta":{"content":"!"}}]}"#,
                "data: [DONE]",
            ])
        })
        .await;
        let client = build_client().unwrap();
        let mut partials = Vec::new();
        let mut on_partial = |t: &str| partials.push(t.to_string());
        let out = translate(&client, &request(&format!("{}/v1", server.origin)), Some(&mut on_partial))
            .await
            .unwrap();
        assert_eq!(out, "Bonjour!");
        assert_eq!(partials, vec!["Bon", "Bonjour", "Bonjour!"]);
        assert_eq!(server.requests().len(), 1);
        assert_eq!(server.requests()[0].path, "/v1/chat/completions");
    }

    #[tokio::test]
    async fn unusable_stream_falls_back_to_blocking_call() {
        let server = serve(|req| {
            if is_stream(&req.json()) {
                Reply::sse(&["data: definitely not json", "data: [DONE]"])
            } else {
                completion("  Bonjour  \n")
            }
        })
        .await;
        let client = build_client().unwrap();
        let mut calls = 0;
        let mut on_partial = |_: &str| calls += 1;
        let out = translate(&client, &request(&server.origin), Some(&mut on_partial))
            .await
            .unwrap();
        assert_eq!(out, "Bonjour");
        assert_eq!(calls, 0);
        let reqs = server.requests();
        assert_eq!(reqs.len(), 2);
        assert!(!is_stream(&reqs[1].json()));
    }

    #[tokio::test]
    async fn non_stream_content_type_falls_back() {
        let server = serve(|_| completion("Salut")).await;
        let client = build_client().unwrap();
        let mut partials: Vec<String> = Vec::new();
        let mut on_partial = |t: &str| partials.push(t.to_string());
        let out = translate(&client, &request(&server.origin), Some(&mut on_partial))
            .await
            .unwrap();
        assert_eq!(out, "Salut");
        assert!(partials.is_empty());
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn failed_stream_status_falls_back_to_blocking_call() {
        let server = serve(|req| {
            if is_stream(&req.json()) {
                Reply::text(503, "busy")
            } else {
                completion("Salut")
            }
        })
        .await;
        let client = build_client().unwrap();
        let mut partials: Vec<String> = Vec::new();
        let mut on_partial = |t: &str| partials.push(t.to_string());
        let out = translate(&client, &request(&server.origin), Some(&mut on_partial))
            .await
            .unwrap();
        assert_eq!(out, "Salut");
        assert!(partials.is_empty());
        let reqs = server.requests();
        assert_eq!(reqs.len(), 2);
        assert!(is_stream(&reqs[0].json()));
        assert!(!is_stream(&reqs[1].json()));
    }

    #[tokio::test]
    async fn stream_without_done_returns_accumulated_text() {
        let server = serve(|_| Reply::sse(&[r#"data: {"choices":[{"delta":{"content":" Hola "}}]}"#])).await;
        let client = build_client().unwrap();
        let mut on_partial = |_: &str| {};
        let out = translate(&client, &request(&server.origin), Some(&mut on_partial))
            .await
            .unwrap();
        assert_eq!(out, "Hola");
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn without_callback_only_the_blocking_call_is_made() {
        let server = serve(|_| completion("Bonjour")).await;
        let client = build_client().unwrap();
        let out = translate(&client, &request(&server.origin), None).await.unwrap();
        assert_eq!(out, "Bonjour");

        let reqs = server.requests();
        assert_eq!(reqs.len(), 1);
        let body = reqs[0].json();
        assert!(body.get("stream").is_none());
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["messages"][0]["role"], "user");
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert!(content.contains("into French language"));
        assert!(content.ends_with("\n\nHello there"));
        let temperature = body["temperature"].as_f64().unwrap();
        assert!((temperature - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn model_not_found_is_reported_structurally() {
        let server = serve(|_| {
            Reply::json(404, json!({"error": {"message": "model \"llama3\" not found, try pulling it first"}}))
        })
        .await;
        let client = build_client().unwrap();
        let mut on_partial = |_: &str| {};
        let err = translate(&client, &request(&server.origin), Some(&mut on_partial))
            .await
            .unwrap_err();
        assert!(err.is_model_not_found("llama3"), "got {err:?}");
    }

    #[tokio::test]
    async fn server_error_surfaces_status() {
        let server = serve(|_| Reply::text(500, "overloaded")).await;
        let client = build_client().unwrap();
        let err = translate(&client, &request(&server.origin), None).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_base_url_is_rejected_before_any_request() {
        let client = build_client().unwrap();
        for bad in ["", "localhost:8000/v1", "not a url"] {
            let err = translate(&client, &request(bad), None).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidBaseUrl(_)), "{bad:?} gave {err:?}");
        }
    }
}
