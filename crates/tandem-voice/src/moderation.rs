//! Two-pass content safety filter.
//!
//! Pass 1 is a local keyword blocklist: instant, always available. Pass 2
//! consults the provider's moderation endpoint with a hard 2 s budget; a
//! failure or timeout there degrades to the blocklist verdict rather than
//! blocking the turn on infrastructure.
//!
//! Applied to user input before the LLM call and to the completed reply
//! before it is committed.

use crate::{Moderation, ProviderConfig, ProviderError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

/// Budget for the remote moderation call.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

static BLOCKLIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bhow\s+to\s+(?:make|build|synthesize)\s+(?:a\s+)?(?:bomb|weapon|explosive|poison)s?\b",
        r"\bkill\s+(?:yourself|himself|herself|themselves)\b",
        r"\bchild\s+(?:pornography|abuse|exploitation)\b",
        r"\bsuicide\s+methods?\b",
        r"\bsynthesi[sz]e\s+(?:methamphetamine|heroin|fentanyl)\b",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("blocklist pattern"))
    .collect()
});

/// Outcome of a moderation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Blocked { reason: String },
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Local blocklist scan. Extremely fast, regex only.
pub fn blocklist_verdict(text: &str) -> Verdict {
    if BLOCKLIST.iter().any(|re| re.is_match(text)) {
        Verdict::Blocked {
            reason: "Content matched safety blocklist".to_string(),
        }
    } else {
        Verdict::Pass
    }
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: HashMap<String, bool>,
}

/// The production moderation adapter.
#[derive(Debug, Clone)]
pub struct Guardrail {
    http: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl Guardrail {
    pub fn new(config: Arc<ProviderConfig>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { http, config }
    }

    async fn remote_check(&self, text: &str) -> Result<Verdict, ProviderError> {
        let url = self.config.endpoint("moderations");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&ModerationRequest { input: text })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: ModerationResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let Some(result) = parsed.results.into_iter().next() else {
            return Ok(Verdict::Pass);
        };

        if result.flagged {
            let mut flagged: Vec<String> = result
                .categories
                .into_iter()
                .filter(|(_, hit)| *hit)
                .map(|(category, _)| category)
                .collect();
            flagged.sort();
            Ok(Verdict::Blocked {
                reason: format!("Moderation flagged: {}", flagged.join(", ")),
            })
        } else {
            Ok(Verdict::Pass)
        }
    }
}

#[async_trait]
impl Moderation for Guardrail {
    async fn check(&self, text: &str) -> Verdict {
        if !self.config.guardrail_enabled || text.trim().is_empty() {
            return Verdict::Pass;
        }

        let local = blocklist_verdict(text);
        if local.is_blocked() {
            return local;
        }

        if self.config.api_key.is_empty() {
            return Verdict::Pass;
        }

        match tokio::time::timeout(REMOTE_TIMEOUT, self.remote_check(text)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "moderation endpoint failed, allowing");
                Verdict::Pass
            }
            Err(_) => {
                tracing::warn!("moderation endpoint timed out, allowing");
                Verdict::Pass
            }
        }
    }
}
