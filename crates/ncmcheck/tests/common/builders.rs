//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use serde_json::json;

use ncmcheck::NewRecord;

/// Builder for the record list of a submission.
pub struct RecordsBuilder {
    records: Vec<NewRecord>,
}

impl RecordsBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn record(mut self, description: &str, code: &str) -> Self {
        self.records.push(NewRecord::new(description, code));
        self
    }

    /// Adds `n` records with distinct codes `prefix-0`, `prefix-1`, ...
    pub fn numbered(mut self, n: usize, prefix: &str) -> Self {
        for i in 0..n {
            self.records.push(NewRecord::new(
                format!("Produto {} {}", prefix, i),
                format!("{}-{}", prefix, i),
            ));
        }
        self
    }

    pub fn build(self) -> Vec<NewRecord> {
        self.records
    }
}

impl Default for RecordsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for config files.
pub struct ConfigBuilder {
    database_path: Option<String>,
    worker_count: usize,
    command: String,
    args: Vec<String>,
    timeout_secs: u64,
    record_concurrency: usize,
    lease_secs: u64,
    poll_interval_ms: u64,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            database_path: None,
            worker_count: 1,
            command: "python3".to_string(),
            args: vec!["skills/validate_ncm.py".to_string()],
            timeout_secs: 30,
            record_concurrency: 4,
            lease_secs: 300,
            poll_interval_ms: 500,
        }
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.database_path = Some(path.to_string());
        self
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn command(mut self, command: &str, args: &[&str]) -> Self {
        self.command = command.to_string();
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn record_concurrency(mut self, n: usize) -> Self {
        self.record_concurrency = n;
        self
    }

    pub fn lease_secs(mut self, secs: u64) -> Self {
        self.lease_secs = secs;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn build_json(self) -> String {
        let mut value = json!({
            "version": "1.0",
            "worker_count": self.worker_count,
            "classifier": {
                "command": self.command,
                "args": self.args,
                "timeout_secs": self.timeout_secs,
            },
            "runner": { "record_concurrency": self.record_concurrency },
            "queue": {
                "lease_secs": self.lease_secs,
                "poll_interval_ms": self.poll_interval_ms,
            },
        });
        if let Some(path) = self.database_path {
            value["database_path"] = json!(path);
        }
        serde_json::to_string_pretty(&value).unwrap()
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
