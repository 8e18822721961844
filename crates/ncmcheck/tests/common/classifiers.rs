//! Classifiers with canned answers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ncmcheck::classifier::{ClassificationRequest, Classifier, ClassifierFailure, Verdict};

/// What the classifier does for one code.
#[derive(Debug, Clone)]
pub enum Answer {
    Valid { confidence: f64 },
    Divergent {
        suggested_code: String,
        explanation: String,
        confidence: f64,
    },
    Fail(ClassifierFailure),
    /// Never answers.
    Hang,
    /// Answers `Valid` after a delay.
    Slow(Duration),
}

impl Answer {
    pub fn divergent(suggested_code: &str, confidence: f64) -> Self {
        Answer::Divergent {
            suggested_code: suggested_code.to_string(),
            explanation: format!("Code should be {}", suggested_code),
            confidence,
        }
    }
}

/// Answers per original code; unknown codes are confirmed.
///
/// Every call is recorded before it is answered.
pub struct ScriptedClassifier {
    answers: HashMap<String, Answer>,
    default_answer: Answer,
    hang_after: Option<usize>,
    calls: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            default_answer: Answer::Valid { confidence: 90.0 },
            hang_after: None,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn answer(mut self, code: &str, answer: Answer) -> Self {
        self.answers.insert(code.to_string(), answer);
        self
    }

    pub fn default_answer(mut self, answer: Answer) -> Self {
        self.default_answer = answer;
        self
    }

    /// Answers the first `n` calls, then hangs on every later call.
    pub fn hang_after(mut self, n: usize) -> Self {
        self.hang_after = Some(n);
        self
    }

    /// Original codes of every call, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Verdict, ClassifierFailure> {
        self.calls.lock().unwrap().push(request.code.clone());
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(limit) = self.hang_after {
            if n >= limit {
                std::future::pending::<()>().await;
            }
        }

        let answer = self
            .answers
            .get(&request.code)
            .cloned()
            .unwrap_or_else(|| self.default_answer.clone());

        match answer {
            Answer::Valid { confidence } => Ok(Verdict {
                is_valid: true,
                suggested_code: request.code.clone(),
                explanation: String::new(),
                confidence,
            }),
            Answer::Divergent {
                suggested_code,
                explanation,
                confidence,
            } => Ok(Verdict {
                is_valid: false,
                suggested_code,
                explanation,
                confidence,
            }),
            Answer::Fail(failure) => Err(failure),
            Answer::Hang => std::future::pending().await,
            Answer::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Verdict {
                    is_valid: true,
                    suggested_code: request.code.clone(),
                    explanation: String::new(),
                    confidence: 80.0,
                })
            }
        }
    }
}
