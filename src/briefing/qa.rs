//! Question-and-answer client
//!
//! Dispatches a transcribed question to the external Q&A endpoint along
//! with session context, and maps the reply into transcript citations.

use crate::transcript::Citation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Request timeout for answers
const ANSWER_TIMEOUT_SECS: u64 = 30;

/// Errors from the Q&A service
#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Q&A service error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response from Q&A service: {0}")]
    InvalidResponse(String),
}

/// Session context sent with each question
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub briefing_id: String,
    pub section_title: String,
    /// Narration text of the section under discussion
    pub section_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct QaRequest<'a> {
    question: &'a str,
    session_context: &'a SessionContext,
}

/// Answer returned by the Q&A endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct QaAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}

/// Source of answers to follow-up questions
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    async fn answer(&self, question: &str, context: &SessionContext) -> Result<QaAnswer, QaError>;
}

/// HTTP client for the Q&A endpoint
pub struct HttpAnswerProvider {
    endpoint_url: String,
    client: reqwest::Client,
}

impl HttpAnswerProvider {
    pub fn new(endpoint_url: String) -> Self {
        Self {
            endpoint_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AnswerProvider for HttpAnswerProvider {
    async fn answer(&self, question: &str, context: &SessionContext) -> Result<QaAnswer, QaError> {
        info!(section = %context.section_title, "Dispatching question to Q&A service");

        let response = self
            .client
            .post(&self.endpoint_url)
            .timeout(Duration::from_secs(ANSWER_TIMEOUT_SECS))
            .json(&QaRequest {
                question,
                session_context: context,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Q&A request failed");
            return Err(QaError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let answer: QaAnswer = response
            .json()
            .await
            .map_err(|e| QaError::InvalidResponse(e.to_string()))?;

        info!(
            citations = answer.citations.len(),
            follow_ups = answer.follow_up_questions.len(),
            "Answer received"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_deserialization() {
        let json = r#"{
            "answer": "Downtime was driven by changeovers on line 3.",
            "citations": [
                {"source": "downtime_report", "data_point": "line 3: 42 min"}
            ],
            "follow_up_questions": ["Would you like the changeover breakdown?"]
        }"#;
        let answer: QaAnswer = serde_json::from_str(json).unwrap();
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].source, "downtime_report");
        assert_eq!(answer.follow_up_questions.len(), 1);
    }

    #[test]
    fn test_answer_without_citations() {
        let json = r#"{"answer": "I don't have that data."}"#;
        let answer: QaAnswer = serde_json::from_str(json).unwrap();
        assert!(answer.citations.is_empty());
        assert!(answer.follow_up_questions.is_empty());
    }

    #[test]
    fn test_request_shape() {
        let context = SessionContext {
            briefing_id: "b-1".into(),
            section_title: "Downtime".into(),
            section_content: "Downtime was 42 minutes.".into(),
            area_id: Some("downtime".into()),
        };
        let json = serde_json::to_string(&QaRequest {
            question: "why was downtime high",
            session_context: &context,
        })
        .unwrap();
        assert!(json.contains(r#""question":"why was downtime high""#));
        assert!(json.contains(r#""briefing_id":"b-1""#));
    }
}
