//! Performance analysis through a generative-AI service.
//!
//! The daemon treats the service as one opaque call: a request carrying the
//! student's component scores goes out, four free-text fields come back. No
//! retries and no schema repair beyond stripping a Markdown fence around the
//! returned JSON.

use crate::config::AiConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("analysis service is not configured (set MERITTRAC_AI_API_KEY)")]
    NotConfigured,

    #[error("analysis request failed: {0}")]
    Request(String),

    #[error("analysis service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid analysis response: {0}")]
    BadResponse(String),
}

impl AiError {
    pub fn code(&self) -> &'static str {
        match self {
            AiError::NotConfigured => "ai_not_configured",
            AiError::Request(_) | AiError::Status { .. } => "ai_request_failed",
            AiError::BadResponse(_) => "ai_bad_response",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkLine {
    pub semester: String,
    pub subject: String,
    pub ca1: Option<f64>,
    pub ca2: Option<f64>,
    pub mid_term: Option<f64>,
    pub end_term: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub student_name: String,
    pub student_id: String,
    pub marks: Vec<MarkLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub overall_performance: String,
    pub strengths: String,
    pub weaknesses: String,
    pub recommendations: String,
}

pub trait Analyzer {
    fn analyze(&self, req: &AnalysisRequest) -> Result<AnalysisResponse, AiError>;
}

pub fn build_prompt(req: &AnalysisRequest) -> String {
    let marks = serde_json::to_string_pretty(&req.marks).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are an academic advisor. Analyze the marks of student {name} (ID: {id}).\n\
         Each entry lists a semester and subject with component scores: \
         ca1 (out of 10), ca2 (out of 10), midTerm (out of 20), endTerm (out of 60). \
         A null score has not been entered yet.\n\n\
         Marks:\n{marks}\n\n\
         Respond with a single JSON object with exactly these string fields: \
         \"overallPerformance\", \"strengths\", \"weaknesses\", \"recommendations\".",
        name = req.student_name,
        id = req.student_id,
        marks = marks,
    )
}

/// Strips an optional ```json ... ``` fence.
fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

pub fn parse_analysis_text(text: &str) -> Result<AnalysisResponse, AiError> {
    serde_json::from_str(strip_code_fence(text)).map_err(|e| AiError::BadResponse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn extract_text(body: &str) -> Result<String, AiError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| AiError::BadResponse(e.to_string()))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AiError::BadResponse("response contained no text".to_string()));
    }
    Ok(text)
}

pub struct GeminiAnalyzer {
    config: AiConfig,
    client: reqwest::blocking::Client,
}

impl GeminiAnalyzer {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }
}

impl Analyzer for GeminiAnalyzer {
    fn analyze(&self, req: &AnalysisRequest) -> Result<AnalysisResponse, AiError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(AiError::NotConfigured);
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": build_prompt(req) }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json"
            }
        });

        info!(
            student_id = %req.student_id,
            mark_count = req.marks.len(),
            model = %self.config.model,
            "requesting performance analysis"
        );
        let resp = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .map_err(|e| AiError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().map_err(|e| AiError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(AiError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        debug!(bytes = text.len(), "analysis response received");

        parse_analysis_text(&extract_text(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> AnalysisRequest {
        AnalysisRequest {
            student_name: "Asha Rao".to_string(),
            student_id: "s-1".to_string(),
            marks: vec![MarkLine {
                semester: "Semester 1".to_string(),
                subject: "Physics".to_string(),
                ca1: Some(8.0),
                ca2: None,
                mid_term: Some(15.0),
                end_term: Some(41.0),
            }],
        }
    }

    #[test]
    fn prompt_names_student_and_fields() {
        let p = build_prompt(&sample_request());
        assert!(p.contains("Asha Rao"));
        assert!(p.contains("s-1"));
        assert!(p.contains("\"midTerm\": 15.0"));
        assert!(p.contains("\"ca2\": null"));
        assert!(p.contains("overallPerformance"));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let text = "```json\n{\"overallPerformance\":\"Good\",\"strengths\":\"Physics\",\"weaknesses\":\"None\",\"recommendations\":\"Keep going\"}\n```";
        let r = parse_analysis_text(text).expect("parse fenced");
        assert_eq!(r.overall_performance, "Good");
        assert_eq!(r.recommendations, "Keep going");
    }

    #[test]
    fn missing_field_is_bad_response() {
        let e = parse_analysis_text("{\"overallPerformance\":\"Good\"}").expect_err("incomplete");
        assert_eq!(e.code(), "ai_bad_response");
    }

    #[test]
    fn candidate_parts_are_joined() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"{\"overallPerformance\":\"A\","},{"text":"\"strengths\":\"B\",\"weaknesses\":\"C\",\"recommendations\":\"D\"}"}]}}]}"#;
        let text = extract_text(body).expect("text");
        let r = parse_analysis_text(&text).expect("parse");
        assert_eq!(r.strengths, "B");
        assert_eq!(r.weaknesses, "C");
    }

    #[test]
    fn empty_candidates_is_bad_response() {
        let e = extract_text("{\"candidates\":[]}").expect_err("no text");
        assert!(matches!(e, AiError::BadResponse(_)));
    }

    #[test]
    fn unconfigured_analyzer_refuses() {
        let a = GeminiAnalyzer::new(AiConfig::default()).expect("client");
        let e = a.analyze(&sample_request()).expect_err("not configured");
        assert_eq!(e.code(), "ai_not_configured");
    }
}
