//! Content-generation client
//!
//! Fetches the ordered section list for a briefing from the external
//! content service. The generation algorithm itself is out of scope; the
//! engine only consumes its response shape.

use crate::briefing::session::Section;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Request timeout for briefing generation
const GENERATION_TIMEOUT_SECS: u64 = 60;

/// Errors from the content service
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Content service error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response from content service: {0}")]
    InvalidResponse(String),
}

/// Request for a generated briefing
#[derive(Debug, Clone, Serialize)]
pub struct BriefingRequest {
    pub user_id: String,
    /// Preferred ordering of dashboard areas to narrate
    pub area_order: Vec<String>,
}

/// A generated briefing: ordered sections plus a duration hint
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedBriefing {
    pub sections: Vec<Section>,
    #[serde(default)]
    pub total_duration_estimate: Option<u64>,
}

/// Source of generated briefing content
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn generate(&self, request: &BriefingRequest) -> Result<GeneratedBriefing, ContentError>;
}

/// HTTP client for the content-generation endpoint
pub struct HttpContentProvider {
    endpoint_url: String,
    client: reqwest::Client,
}

impl HttpContentProvider {
    pub fn new(endpoint_url: String) -> Self {
        Self {
            endpoint_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn generate(&self, request: &BriefingRequest) -> Result<GeneratedBriefing, ContentError> {
        info!(user_id = %request.user_id, areas = request.area_order.len(), "Requesting briefing generation");

        let response = self
            .client
            .post(&self.endpoint_url)
            .timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Briefing generation failed");
            return Err(ContentError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let briefing: GeneratedBriefing = response
            .json()
            .await
            .map_err(|e| ContentError::InvalidResponse(e.to_string()))?;

        if briefing.sections.is_empty() {
            return Err(ContentError::InvalidResponse(
                "generated briefing has no sections".to_string(),
            ));
        }

        info!(
            sections = briefing.sections.len(),
            estimate = ?briefing.total_duration_estimate,
            "Briefing generated"
        );
        Ok(briefing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_briefing_deserialization() {
        let json = r#"{
            "sections": [
                {"title": "Downtime", "content": "Downtime was 42 minutes.", "pause_point": true},
                {"title": "Quality", "content": "First-pass yield held at 97%.", "area_id": "quality", "pause_point": false, "audio_url": "https://tts.example.com/s1.mp3"}
            ],
            "total_duration_estimate": 180
        }"#;
        let briefing: GeneratedBriefing = serde_json::from_str(json).unwrap();
        assert_eq!(briefing.sections.len(), 2);
        assert!(briefing.sections[0].pause_point);
        assert_eq!(
            briefing.sections[1].audio_url.as_deref(),
            Some("https://tts.example.com/s1.mp3")
        );
        assert_eq!(briefing.total_duration_estimate, Some(180));
    }

    #[test]
    fn test_request_serialization() {
        let request = BriefingRequest {
            user_id: "u-7".into(),
            area_order: vec!["downtime".into(), "quality".into()],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""user_id":"u-7""#));
        assert!(json.contains("downtime"));
    }
}
