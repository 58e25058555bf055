//! An `Oracle` implementation over an OpenAI-compatible chat-completions
//! endpoint.

use anyhow::{Context, Result};
use scc_agent_core::{Analysis, FailureContext, Oracle};
use serde::Deserialize;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are an expert on OpenShift SecurityContextConstraints. \
Given a deployment failure, the current SCC, and the workload's extracted security \
requirements, identify the root cause and propose the smallest SCC adjustments that \
would admit the workload. Never suggest more privilege than the failure evidence \
justifies, and attach a confidence between 0 and 1 to every adjustment.";

pub struct ChatOracle {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatReply {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

// === impl ChatOracle ===

impl ChatOracle {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn user_prompt(context: &FailureContext) -> Result<String> {
        let context = serde_json::to_string_pretty(context)?;
        Ok(format!(
            "Analyze this OpenShift deployment failure and respond with a single JSON object \
             of the form:\n\
             {{\n\
             \x20 \"error_analysis\": \"...\",\n\
             \x20 \"root_cause\": \"...\",\n\
             \x20 \"suggested_adjustments\": [\n\
             \x20   {{\"field\": \"<dot.path.into.the.SCC>\", \"current_value\": ..., \
             \"suggested_value\": ..., \"reason\": \"...\", \"confidence\": 0.0, \
             \"impact\": \"low|medium|high\"}}\n\
             \x20 ],\n\
             \x20 \"alternative_approaches\": [\"...\"],\n\
             \x20 \"security_implications\": [\"...\"],\n\
             \x20 \"confidence_score\": 0.0\n\
             }}\n\n\
             FAILURE CONTEXT:\n{context}"
        ))
    }
}

#[async_trait::async_trait]
impl Oracle for ChatOracle {
    async fn propose(&self, context: &FailureContext) -> Result<Analysis> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.1,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_prompt(context)?},
            ],
        });

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        debug!(%url, model = %self.model, "consulting oracle");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("oracle request failed")?
            .error_for_status()
            .context("oracle returned an error status")?;

        let reply: ChatReply = response
            .json()
            .await
            .context("oracle response was not valid JSON")?;
        let content = reply
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();
        Ok(parse_analysis(content))
    }
}

/// Extracts the structured analysis from a free-form oracle reply. Anything
/// unparseable degrades to a low-confidence analysis carrying the raw text.
fn parse_analysis(content: &str) -> Analysis {
    let json = content
        .find('{')
        .and_then(|start| content.rfind('}').map(|end| &content[start..=end]));
    let Some(json) = json else {
        return unstructured(content);
    };
    match serde_json::from_str::<Analysis>(json) {
        Ok(mut analysis) => {
            analysis.success = true;
            analysis
        }
        Err(error) => {
            warn!(%error, "oracle reply had no parseable analysis");
            unstructured(content)
        }
    }
}

fn unstructured(content: &str) -> Analysis {
    Analysis {
        success: true,
        error_analysis: content.to_string(),
        root_cause: "unable to parse structured response".to_string(),
        confidence_score: 0.3,
        ..Default::default()
    }
}
