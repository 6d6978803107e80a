//! Generation gateway — the external text/image capability.
//!
//! The relay only sees `respond` and `summarize_title`; retries,
//! prompt-mode classification, and the image pipeline live behind the
//! seam. Exhausted retries yield fixed fallback content, never an error
//! to the peer.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use roomrelay_protocol::now_unix;

use crate::error::RelayError;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Terminal fallback when text generation is unavailable
pub const FALLBACK_BUSY: &str =
    "The assistant is busy right now. Please try again in a moment.";

/// Terminal fallback when an image was requested but cannot be produced
pub const FALLBACK_IMAGE_UNAVAILABLE: &str =
    "I can't create that image right now. Please try again shortly or send a different prompt.";

/// Terminal fallback when an image prompt is too vague to render
pub const FALLBACK_IMAGE_CLARIFY: &str =
    "Could you describe the image you'd like in more detail (subject, mood, style)?";

/// What kind of answer a prompt is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Text,
    Image,
}

/// The gateway's answer to a submitted prompt. `content` is either
/// generated text or an image reference.
#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub is_image: bool,
    pub content: String,
}

impl GatewayReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            is_image: false,
            content: content.into(),
        }
    }

    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            is_image: true,
            content: reference.into(),
        }
    }
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Answer a user prompt. Infallible from the caller's perspective:
    /// provider failure degrades to fallback content.
    async fn respond(&self, prompt: &str) -> GatewayReply;

    /// Summarize recent turns into a short room title. Best-effort;
    /// `None` leaves the existing title unchanged.
    async fn summarize_title(&self, context: &[String]) -> Option<String>;
}

/// Delay before retry `attempt` (1-based): exponential from 1s.
fn backoff_delay(attempt: u32) -> Duration {
    INITIAL_BACKOFF * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Pull the generated text out of a provider response body.
fn parse_generated_text(body: &Value) -> Option<String> {
    let text = body["candidates"][0]["content"]["parts"][0]["text"].as_str()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// HTTP-backed gateway against a generateContent-style provider, plus a
/// prompt-addressed image render endpoint.
pub struct HttpGateway {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    title_model: String,
    image_endpoint: Option<String>,
}

impl HttpGateway {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        title_model: String,
        image_endpoint: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            title_model,
            image_endpoint,
        }
    }

    /// One provider call. Retried by `generate_with_retry`.
    async fn generate_once(&self, model: &str, prompt: &str) -> Result<String, RelayError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::GatewayUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::GatewayUnavailable(format!(
                "provider returned {status}"
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| RelayError::GatewayUnavailable(e.to_string()))?;

        parse_generated_text(&json)
            .ok_or_else(|| RelayError::GatewayUnavailable("empty completion".into()))
    }

    /// 3 attempts, exponential backoff starting at 1s.
    async fn generate_with_retry(&self, model: &str, prompt: &str) -> Result<String, RelayError> {
        if self.api_key.is_empty() {
            return Err(RelayError::GatewayUnavailable("no api key".into()));
        }

        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.generate_once(model, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(
                        component = "gateway",
                        event = "gateway.attempt_failed",
                        attempt = attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "Generation attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| RelayError::GatewayUnavailable("exhausted".into())))
    }

    async fn classify_mode(&self, prompt: &str) -> PromptMode {
        let instruction = format!(
            "You are a classifier for user requests.\n\
             Decide whether the following prompt asks you to create, draw, or \
             generate an image, illustration, photo, icon, logo, or poster \
             (IMAGE) or only asks for a text answer (TEXT).\n\
             Reply with exactly one word, all caps: IMAGE or TEXT.\n\n\
             PROMPT:\n{prompt}"
        );
        match self.generate_with_retry(&self.model, &instruction).await {
            Ok(text) if text.trim().to_uppercase().starts_with("IMAGE") => PromptMode::Image,
            Ok(_) => PromptMode::Text,
            // Unclassifiable prompts take the text path
            Err(_) => PromptMode::Text,
        }
    }

    async fn is_valid_image_prompt(&self, prompt: &str) -> bool {
        let instruction = format!(
            "You are a classifier for image generation prompts.\n\
             Decide whether the following prompt is clear and specific enough \
             to render: it should contain something visualizable (subject, \
             scene, colors, style, action). Too-short gibberish or non-visual \
             questions are INVALID.\n\
             Reply with exactly one word, all caps: VALID or INVALID.\n\n\
             PROMPT:\n{prompt}"
        );
        match self.generate_with_retry(&self.model, &instruction).await {
            Ok(text) => text.trim().to_uppercase().starts_with("VALID"),
            Err(_) => false,
        }
    }

    /// Render an image for the prompt via the prompt-addressed endpoint.
    /// Returns the fetchable reference, or None on any failure.
    async fn render_image(&self, prompt: &str) -> Option<String> {
        let endpoint = self.image_endpoint.as_deref()?;
        let mut url = reqwest::Url::parse(endpoint).ok()?;
        url.path_segments_mut()
            .ok()?
            .push(&format!("ik-genimg-prompt-{prompt}"))
            .push("relay")
            .push(&format!("{}.png", now_unix()));
        url.set_query(Some("tr=w-800,h-800"));

        let resp = self.http.get(url.clone()).send().await.ok()?;
        if !resp.status().is_success() {
            debug!(
                component = "gateway",
                event = "gateway.image_render_failed",
                status = %resp.status(),
                "Image render returned non-success"
            );
            return None;
        }
        Some(url.to_string())
    }
}

#[async_trait]
impl GenerationGateway for HttpGateway {
    async fn respond(&self, prompt: &str) -> GatewayReply {
        match self.classify_mode(prompt).await {
            PromptMode::Text => match self.generate_with_retry(&self.model, prompt).await {
                Ok(text) => GatewayReply::text(text),
                Err(e) => {
                    warn!(
                        component = "gateway",
                        event = "gateway.completion_exhausted",
                        error = %e,
                        "Completion failed after retries, substituting fallback"
                    );
                    GatewayReply::text(FALLBACK_BUSY)
                }
            },
            PromptMode::Image => {
                if self.image_endpoint.is_none() || !self.is_valid_image_prompt(prompt).await {
                    let clarify = format!(
                        "The user sent this message:\n\n{prompt}\n\n\
                         It is not specific enough to render as an image. Reply \
                         with one or two short, polite sentences asking them to \
                         describe the image they want (subject, mood, style). \
                         Do not mention validation, models, or technical errors."
                    );
                    let content = self
                        .generate_with_retry(&self.model, &clarify)
                        .await
                        .unwrap_or_else(|_| FALLBACK_IMAGE_CLARIFY.to_string());
                    return GatewayReply::text(content);
                }

                match self.render_image(prompt).await {
                    Some(reference) => GatewayReply::image(reference),
                    None => {
                        let apology = format!(
                            "The user asked for an image with this prompt:\n\n{prompt}\n\n\
                             The image could not be produced right now. Reply with one \
                             short sentence saying you can't create the image at the \
                             moment and asking them to try again later. Do not mention \
                             technical reasons or server errors."
                        );
                        let content = self
                            .generate_with_retry(&self.model, &apology)
                            .await
                            .unwrap_or_else(|_| FALLBACK_IMAGE_UNAVAILABLE.to_string());
                        GatewayReply::text(content)
                    }
                }
            }
        }
    }

    async fn summarize_title(&self, context: &[String]) -> Option<String> {
        if context.is_empty() {
            return None;
        }
        let joined = context.join("\n\n");
        let prompt = format!(
            "You are an expert summarizer. Produce one short, clear, engaging \
             title (at most 12 words) for the following conversation. Reply \
             with only the title, no quotes, no explanation.\n\n\
             Conversation:\n{joined}"
        );
        match self.generate_with_retry(&self.title_model, &prompt).await {
            Ok(title) => Some(title),
            Err(e) => {
                debug!(
                    component = "gateway",
                    event = "gateway.title_failed",
                    error = %e,
                    "Title summarization failed, keeping existing title"
                );
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Scriptable gateway for relay tests. Echoes prompts, optionally
    /// simulating provider exhaustion or image replies, and can hold a
    /// call open to expose interleaving bugs.
    pub(crate) struct MockGateway {
        pub fail: AtomicBool,
        pub image_mode: AtomicBool,
        pub respond_calls: AtomicUsize,
        pub title_calls: AtomicUsize,
        pub delay: Duration,
    }

    impl Default for MockGateway {
        fn default() -> Self {
            Self {
                fail: AtomicBool::new(false),
                image_mode: AtomicBool::new(false),
                respond_calls: AtomicUsize::new(0),
                title_calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    impl MockGateway {
        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl GenerationGateway for MockGateway {
        async fn respond(&self, prompt: &str) -> GatewayReply {
            self.respond_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return GatewayReply::text(FALLBACK_BUSY);
            }
            if self.image_mode.load(Ordering::SeqCst) {
                return GatewayReply::image(format!("https://img.example/{prompt}.png"));
            }
            GatewayReply::text(format!("echo: {prompt}"))
        }

        async fn summarize_title(&self, context: &[String]) -> Option<String> {
            self.title_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) || context.is_empty() {
                return None;
            }
            Some("A Test Conversation".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_one_second() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn parses_generated_text_from_provider_body() {
        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "  hello  " }] } }]
        });
        assert_eq!(parse_generated_text(&body).as_deref(), Some("hello"));

        let empty = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "   " }] } }]
        });
        assert!(parse_generated_text(&empty).is_none());
        assert!(parse_generated_text(&serde_json::json!({})).is_none());
    }

    #[tokio::test]
    async fn keyless_gateway_degrades_to_fallback() {
        let gateway = HttpGateway::new(
            String::new(),
            "https://provider.invalid/v1".into(),
            "test-model".into(),
            "test-model".into(),
            None,
        );
        // No key means no outbound call: classification falls back to
        // the text path and completion substitutes the busy message.
        let reply = gateway.respond("hello").await;
        assert!(!reply.is_image);
        assert_eq!(reply.content, FALLBACK_BUSY);
        assert!(gateway.summarize_title(&["user: hi".into()]).await.is_none());
    }
}
