//! Gemini chat client for space-weather questions

use std::fmt::Write as _;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::ApiKey;
use crate::aggregate::AggregateSummary;
use crate::config::Timeouts;
use crate::fetch::{FetchError, FetchRequest, FetchResult, TimedFetch};

/// Base URL for the Gemini API
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Gemini model
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-flash";

const PREAMBLE: &str = "You are a space weather assistant. Answer questions about solar \
wind, geomagnetic storms, coronal mass ejections, solar flares and aurora clearly and \
concisely. If current conditions are provided, use them in your answer.";

/// Single-turn chat client
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: ApiKey,
    model: String,
    http: TimedFetch,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        http: TimedFetch,
        timeouts: &Timeouts,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: ApiKey::new(api_key),
            model: model.into(),
            http,
            timeout: timeouts.chat(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Asks one question, optionally grounded in the current summary
    pub async fn ask(&self, question: &str, context: Option<&AggregateSummary>) -> FetchResult<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": build_prompt(question, context) }]
            }]
        });
        self.http
            .fetch_parsed(&FetchRequest::post_json(url, body), self.timeout, parse_reply)
            .await
    }
}

/// Builds the prompt text sent to the model
pub fn build_prompt(question: &str, context: Option<&AggregateSummary>) -> String {
    let mut prompt = String::from(PREAMBLE);
    prompt.push_str("\n\n");

    if let Some(summary) = context {
        prompt.push_str("Current conditions:\n");
        let _ = writeln!(
            prompt,
            "- Solar wind: {:.0} km/s, density {:.1} p/cm3",
            summary.solar_wind.speed_km_s, summary.solar_wind.density_p_cm3
        );
        let _ = writeln!(
            prompt,
            "- IMF: Bz {:.1} nT, Bt {:.1} nT",
            summary.magnetic_field.bz_nt, summary.magnetic_field.bt_nt
        );
        let _ = writeln!(
            prompt,
            "- Kp index: {:.1} ({})",
            summary.geomagnetic.kp_index, summary.geomagnetic.storm_level
        );
        let _ = writeln!(prompt, "- X-ray flare class: {}", summary.xray.flare_class);
        let _ = writeln!(
            prompt,
            "- CMEs {}: {}",
            window_phrase(summary.cme.window_days),
            summary.cme.total_cmes
        );
        let _ = writeln!(
            prompt,
            "- CME probability: {:.1}% ({})",
            summary.prediction.snapshot.probability, summary.prediction.snapshot.alert_level
        );
        prompt.push('\n');
    }

    prompt.push_str("Question: ");
    prompt.push_str(question.trim());
    prompt
}

fn window_phrase(days: u32) -> String {
    match days {
        0 => "recently".to_string(),
        1 => "in the last day".to_string(),
        n => format!("in the last {} days", n),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Extracts the first candidate's text
pub fn parse_reply(body: &str) -> FetchResult<String> {
    let response: GenerateContentResponse = serde_json::from_str(body)?;

    let text: String = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "empty reply".to_string());
        return Err(FetchError::ParseFailure(reason));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const REPLY: &str = r#"{
        "candidates": [{
            "content": {"parts": [{"text": "A Kp of 7 means "}, {"text": "a strong (G3) storm."}], "role": "model"},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 80}
    }"#;

    #[test]
    fn test_parse_reply_joins_parts() {
        assert_eq!(
            parse_reply(REPLY).expect("reply"),
            "A Kp of 7 means a strong (G3) storm."
        );
    }

    #[test]
    fn test_parse_reply_blocked() {
        let result = parse_reply(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#);
        assert_eq!(result.unwrap_err(), FetchError::ParseFailure("SAFETY".to_string()));
    }

    #[test]
    fn test_parse_reply_empty_candidates() {
        assert!(parse_reply(r#"{"candidates": []}"#).is_err());
    }

    #[test]
    fn test_build_prompt_without_context() {
        let prompt = build_prompt("  What is a CME? ", None);

        assert!(prompt.starts_with("You are a space weather assistant"));
        assert!(prompt.ends_with("Question: What is a CME?"));
        assert!(!prompt.contains("Current conditions"));
    }

    #[test]
    fn test_build_prompt_with_context() {
        let mut summary = AggregateSummary::default();
        summary.geomagnetic.kp_index = 7.33;
        summary.geomagnetic.storm_level = "G3".to_string();

        let prompt = build_prompt("Will I see aurora?", Some(&summary));

        assert!(prompt.contains("- Kp index: 7.3 (G3)"));
        assert!(prompt.contains("Question: Will I see aurora?"));
    }

    #[test]
    fn test_build_prompt_uses_catalog_window() {
        let mut summary = AggregateSummary::default();
        summary.cme.total_cmes = 4;
        summary.cme.window_days = 14;

        let prompt = build_prompt("Any CMEs?", Some(&summary));
        assert!(prompt.contains("- CMEs in the last 14 days: 4"));
        assert!(!prompt.contains("last week"));

        summary.cme.window_days = 1;
        let prompt = build_prompt("Any CMEs?", Some(&summary));
        assert!(prompt.contains("- CMEs in the last day: 4"));
    }

    #[tokio::test]
    async fn test_ask_posts_generate_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-test:generateContent")
                    .query_param("key", "GEMINI_KEY")
                    .body_contains("What is Bz?");
                then.status(200).body(REPLY);
            })
            .await;
        let client = ChatClient::new(
            server.base_url(),
            "GEMINI_KEY",
            "gemini-test",
            TimedFetch::new(),
            &Timeouts::default(),
        );

        let reply = client.ask("What is Bz?", None).await.expect("reply");

        mock.assert_async().await;
        assert!(reply.contains("G3"));
    }
}
