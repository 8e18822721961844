use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{parse_verdict, ClassificationRequest, Classifier, ClassifierFailure, Verdict};
use crate::config::ClassifierConfig;

/// Runs an external program once per record.
///
/// The request is written to stdin as a single JSON object and the verdict
/// is read from stdout. The child is killed if the call is dropped, which is
/// how timeouts and shutdown stop a slow classifier.
#[derive(Debug, Clone)]
pub struct SubprocessClassifier {
    command: String,
    args: Vec<String>,
}

impl SubprocessClassifier {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

#[async_trait]
impl Classifier for SubprocessClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Verdict, ClassifierFailure> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ClassifierFailure::Unreachable(format!("encode request: {}", e)))?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClassifierFailure::Unreachable(format!("spawn '{}': {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A classifier may exit without reading its input; its exit
            // status and output decide the result, not the broken pipe.
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Classifier closed stdin early: {}", e);
                }
                Err(e) => {
                    return Err(ClassifierFailure::Unreachable(format!("write stdin: {}", e)))
                }
            }
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ClassifierFailure::Unreachable(format!("wait: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // Legacy classifiers print an error verdict before exiting non-zero.
            if let Err(ClassifierFailure::Rejected(reason)) =
                parse_verdict(&stdout, &request.code)
            {
                return Err(ClassifierFailure::Rejected(reason));
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClassifierFailure::Rejected(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_verdict(&stdout, &request.code)
    }
}
