use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

use crate::classifier::{ClassificationRequest, Classifier, Verdict};
use crate::db::record_repo::RecordCompletion;
use crate::state::RecordState;

use super::error::{ClassificationError, ClassificationErrorKind};

/// Divergence reason stored on records the classifier confirmed.
pub const CONFIRMED_NOTE: &str = "Classification confirmed by classifier.";

/// Asks the classifier about one record, bounded by a timeout.
///
/// Has no side effects beyond the classifier call. Verdicts that fail
/// [`Verdict::check`] are reported as invalid output, whatever classifier
/// produced them.
#[derive(Clone)]
pub struct RecordValidator {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
}

impl RecordValidator {
    pub fn new(classifier: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self {
            classifier,
            timeout,
        }
    }

    pub async fn validate(
        &self,
        record_id: &str,
        description: &str,
        original_code: &str,
    ) -> Result<Verdict, ClassificationError> {
        let request = ClassificationRequest {
            description: description.to_string(),
            code: original_code.to_string(),
        };

        match tokio::time::timeout(self.timeout, self.classifier.classify(&request)).await {
            Ok(Ok(verdict)) => {
                if let Err(cause) = verdict.check() {
                    return Err(ClassificationError {
                        record_id: record_id.to_string(),
                        kind: ClassificationErrorKind::InvalidOutput,
                        cause,
                    });
                }
                debug!(
                    "Record {} classified: valid={} confidence={}",
                    record_id, verdict.is_valid, verdict.confidence
                );
                Ok(verdict)
            }
            Ok(Err(failure)) => Err(ClassificationError::from_failure(record_id, failure)),
            Err(_) => Err(ClassificationError {
                record_id: record_id.to_string(),
                kind: ClassificationErrorKind::Timeout,
                cause: format!("no verdict within {}s", self.timeout.as_secs_f64()),
            }),
        }
    }
}

/// The terminal values a record takes after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub state: RecordState,
    pub suggested_code: String,
    pub divergence_reason: String,
    pub confidence: f64,
}

impl RecordOutcome {
    pub fn from_verdict(original_code: &str, verdict: &Verdict) -> Self {
        if verdict.is_valid {
            Self {
                state: RecordState::Valid,
                suggested_code: original_code.to_string(),
                divergence_reason: CONFIRMED_NOTE.to_string(),
                confidence: verdict.confidence,
            }
        } else {
            let reason = if verdict.explanation.trim().is_empty() {
                format!("Classifier suggested {}.", verdict.suggested_code)
            } else {
                verdict.explanation.clone()
            };
            Self {
                state: RecordState::Divergent,
                suggested_code: verdict.suggested_code.clone(),
                divergence_reason: reason,
                confidence: verdict.confidence,
            }
        }
    }

    /// A failed record keeps its own code as the suggestion, with zero confidence.
    pub fn from_error(original_code: &str, error: &ClassificationError) -> Self {
        Self {
            state: RecordState::Failed,
            suggested_code: original_code.to_string(),
            divergence_reason: error.reason(),
            confidence: 0.0,
        }
    }

    pub fn into_completion(self, processed_at: DateTime<Utc>) -> RecordCompletion {
        RecordCompletion {
            state: self.state,
            suggested_code: self.suggested_code,
            divergence_reason: self.divergence_reason,
            confidence: self.confidence,
            processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierFailure;
    use async_trait::async_trait;

    struct Fixed(Result<Verdict, ClassifierFailure>);

    #[async_trait]
    impl Classifier for Fixed {
        async fn classify(
            &self,
            _request: &ClassificationRequest,
        ) -> Result<Verdict, ClassifierFailure> {
            self.0.clone()
        }
    }

    struct Stalled;

    #[async_trait]
    impl Classifier for Stalled {
        async fn classify(
            &self,
            _request: &ClassificationRequest,
        ) -> Result<Verdict, ClassifierFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ClassifierFailure::Unreachable("unreachable".to_string()))
        }
    }

    fn divergent() -> Verdict {
        Verdict {
            is_valid: false,
            suggested_code: "1806.32.00".to_string(),
            explanation: "Produto de chocolate".to_string(),
            confidence: 85.0,
        }
    }

    #[tokio::test]
    async fn test_validate_passes_verdict_through() {
        let validator = RecordValidator::new(Arc::new(Fixed(Ok(divergent()))), Duration::from_secs(5));
        let verdict = validator.validate("r1", "Chocolate", "0102.31.00").await.unwrap();
        assert_eq!(verdict, divergent());
    }

    #[tokio::test]
    async fn test_validate_maps_failure_kind() {
        let validator = RecordValidator::new(
            Arc::new(Fixed(Err(ClassifierFailure::InvalidOutput("garbage".to_string())))),
            Duration::from_secs(5),
        );
        let err = validator.validate("r1", "x", "1").await.unwrap_err();
        assert_eq!(err.record_id, "r1");
        assert_eq!(err.kind, ClassificationErrorKind::InvalidOutput);
        assert_eq!(err.cause, "garbage");
    }

    #[tokio::test]
    async fn test_validate_rejects_unchecked_verdicts() {
        let cases = [
            Verdict {
                confidence: 150.0,
                ..divergent()
            },
            Verdict {
                confidence: f64::NAN,
                is_valid: true,
                ..divergent()
            },
            Verdict {
                suggested_code: String::new(),
                ..divergent()
            },
        ];
        for verdict in cases {
            let validator =
                RecordValidator::new(Arc::new(Fixed(Ok(verdict))), Duration::from_secs(5));
            let err = validator.validate("r2", "Chocolate", "0102.31.00").await.unwrap_err();
            assert_eq!(err.kind, ClassificationErrorKind::InvalidOutput);
            assert_eq!(err.record_id, "r2");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_times_out() {
        let validator = RecordValidator::new(Arc::new(Stalled), Duration::from_secs(30));
        let err = validator.validate("r9", "x", "1").await.unwrap_err();
        assert_eq!(err.kind, ClassificationErrorKind::Timeout);
        assert_eq!(err.record_id, "r9");
    }

    #[test]
    fn test_valid_verdict_keeps_original_code() {
        let verdict = Verdict {
            is_valid: true,
            suggested_code: "9999.99.99".to_string(),
            explanation: String::new(),
            confidence: 95.0,
        };
        let outcome = RecordOutcome::from_verdict("0102.31.00", &verdict);
        assert_eq!(outcome.state, RecordState::Valid);
        assert_eq!(outcome.suggested_code, "0102.31.00");
        assert_eq!(outcome.divergence_reason, CONFIRMED_NOTE);
        assert_eq!(outcome.confidence, 95.0);
    }

    #[test]
    fn test_divergent_verdict_uses_suggestion() {
        let outcome = RecordOutcome::from_verdict("0102.31.00", &divergent());
        assert_eq!(outcome.state, RecordState::Divergent);
        assert_eq!(outcome.suggested_code, "1806.32.00");
        assert_eq!(outcome.divergence_reason, "Produto de chocolate");
    }

    #[test]
    fn test_failure_outcome_is_fully_populated() {
        let error = ClassificationError {
            record_id: "r1".to_string(),
            kind: ClassificationErrorKind::Rejected,
            cause: "exit status 1".to_string(),
        };
        let completion =
            RecordOutcome::from_error("0102.31.00", &error).into_completion(Utc::now());

        assert_eq!(completion.state, RecordState::Failed);
        assert_eq!(completion.suggested_code, "0102.31.00");
        assert_eq!(completion.confidence, 0.0);
        assert!(completion.divergence_reason.contains("exit status 1"));
    }
}
