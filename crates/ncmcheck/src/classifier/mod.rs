//! Classifier boundary.
//!
//! A classifier receives one product description plus its declared code and
//! answers whether the code fits. The only production implementation talks to
//! an external process ([`SubprocessClassifier`]); tests plug in their own.

pub mod subprocess;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use subprocess::SubprocessClassifier;

/// Payload sent to the classifier for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRequest {
    pub description: String,
    /// Passed through exactly as stored.
    pub code: String,
}

/// Structured answer of the classifier for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub is_valid: bool,
    pub suggested_code: String,
    pub explanation: String,
    /// In `[0, 100]`.
    pub confidence: f64,
}

impl Verdict {
    /// Checks the values any classifier must respect before a verdict is
    /// stored: a finite confidence within `[0, 100]`, and a suggestion on
    /// every divergent verdict.
    pub fn check(&self) -> Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=100.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 100]", self.confidence));
        }
        if !self.is_valid && self.suggested_code.trim().is_empty() {
            return Err("divergent verdict without 'suggested_code'".to_string());
        }
        Ok(())
    }
}

/// Why a classifier produced no verdict.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierFailure {
    #[error("classifier unreachable: {0}")]
    Unreachable(String),

    #[error("invalid classifier output: {0}")]
    InvalidOutput(String),

    #[error("classifier rejected the record: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest)
        -> Result<Verdict, ClassifierFailure>;
}

/// Output object as written by the classifier process.
///
/// Older classifiers answer with Portuguese keys and a `status` string
/// instead of `is_valid`; both shapes are accepted.
#[derive(Debug, Deserialize)]
struct WireVerdict {
    #[serde(default)]
    is_valid: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "ncm_sugerido")]
    suggested_code: Option<String>,
    #[serde(default, alias = "explicacao")]
    explanation: Option<String>,
    #[serde(default, alias = "confianca")]
    confidence: Option<f64>,
}

enum WireStatus {
    Valid,
    Divergent,
    Error,
}

fn parse_status(raw: &str) -> Option<WireStatus> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "VALID" | "VALIDO" => Some(WireStatus::Valid),
        "DIVERGENT" | "DIVERGENTE" => Some(WireStatus::Divergent),
        "ERROR" | "ERRO" => Some(WireStatus::Error),
        _ => None,
    }
}

/// Parses classifier output into a [`Verdict`].
///
/// `original_code` fills in the suggestion of a confirming verdict that
/// omits one. The whole output is tried first, then its last non-empty line,
/// so classifiers that print diagnostics before the result still work.
pub fn parse_verdict(output: &str, original_code: &str) -> Result<Verdict, ClassifierFailure> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ClassifierFailure::InvalidOutput(
            "empty output".to_string(),
        ));
    }

    let wire: WireVerdict = match serde_json::from_str(trimmed) {
        Ok(wire) => wire,
        Err(first) => {
            let last_line = trimmed
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or(trimmed);
            serde_json::from_str(last_line.trim())
                .map_err(|_| ClassifierFailure::InvalidOutput(first.to_string()))?
        }
    };

    let is_valid = match (wire.is_valid, wire.status.as_deref()) {
        (Some(flag), _) => flag,
        (None, Some(raw)) => match parse_status(raw) {
            Some(WireStatus::Valid) => true,
            Some(WireStatus::Divergent) => false,
            Some(WireStatus::Error) => {
                let reason = wire
                    .explanation
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "classifier reported an error".to_string());
                return Err(ClassifierFailure::Rejected(reason));
            }
            None => {
                return Err(ClassifierFailure::InvalidOutput(format!(
                    "unknown status '{}'",
                    raw
                )))
            }
        },
        (None, None) => {
            return Err(ClassifierFailure::InvalidOutput(
                "missing 'is_valid' or 'status'".to_string(),
            ))
        }
    };

    let confidence = wire.confidence.ok_or_else(|| {
        ClassifierFailure::InvalidOutput("missing 'confidence'".to_string())
    })?;

    let suggested_code = match wire.suggested_code.filter(|c| !c.trim().is_empty()) {
        Some(code) => code,
        None if is_valid => original_code.to_string(),
        None => String::new(),
    };

    let verdict = Verdict {
        is_valid,
        suggested_code,
        explanation: wire.explanation.unwrap_or_default(),
        confidence,
    };
    verdict.check().map_err(ClassifierFailure::InvalidOutput)?;
    Ok(verdict)
}
