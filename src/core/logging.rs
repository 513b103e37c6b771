// src/core/logging.rs
use std::sync::atomic::{AtomicU64, Ordering};

use super::timestamp::utc_ns_now;

// Global sequence number for correlating log lines
static LOG_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct LogContext {
    pub component: String,
    pub instance_id: String,
    pub job_id: Option<u64>,
    pub sequence: u64,
    pub timestamp_ns: u64,
}

impl LogContext {
    pub fn new(component: &str, instance_id: &str) -> Self {
        Self {
            component: component.to_string(),
            instance_id: instance_id.to_string(),
            job_id: None,
            sequence: LOG_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            timestamp_ns: utc_ns_now(),
        }
    }

    pub fn with_job(mut self, job_id: u64) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn format(&self, level: &str, message: &str) -> String {
        let job_info = match self.job_id {
            Some(job) => format!(" job={}", job),
            None => String::new(),
        };

        format!(
            "[{}][seq={:06}][{}:{}{}] {}",
            level, self.sequence, self.component, self.instance_id, job_info, message
        )
    }
}

/// Uniform logging for replay components.
pub trait ComponentLogger {
    fn log_context(&self) -> LogContext;

    fn debug(&self, message: &str) {
        let ctx = self.log_context();
        log::debug!("{}", ctx.format("DEBUG", message));
    }

    fn info(&self, message: &str) {
        let ctx = self.log_context();
        log::info!("{}", ctx.format("INFO", message));
    }

    fn warn(&self, message: &str) {
        let ctx = self.log_context();
        log::warn!("{}", ctx.format("WARN", message));
    }

    fn error(&self, message: &str) {
        let ctx = self.log_context();
        log::error!("{}", ctx.format("ERROR", message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_creation() {
        let ctx = LogContext::new("ReplayBuffer", "main");

        assert_eq!(ctx.component, "ReplayBuffer");
        assert_eq!(ctx.instance_id, "main");
        assert!(ctx.timestamp_ns > 0);
        assert!(ctx.job_id.is_none());
    }

    #[test]
    fn test_sequence_increases() {
        let first = LogContext::new("A", "1");
        let second = LogContext::new("A", "1");
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_log_formatting() {
        let ctx = LogContext::new("Extractor", "42");
        let formatted = ctx.format("INFO", "seek");

        assert!(formatted.contains("[INFO]"));
        assert!(formatted.contains("[Extractor:42]"));
        assert!(formatted.contains("seek"));

        let with_job = ctx.with_job(7).format("DEBUG", "tracks loaded");
        assert!(with_job.contains("[Extractor:42 job=7]"));
    }

    #[test]
    fn test_component_logger_trait() {
        struct MockComponent {
            id: String,
        }

        impl ComponentLogger for MockComponent {
            fn log_context(&self) -> LogContext {
                LogContext::new("Mock", &self.id)
            }
        }

        let component = MockComponent {
            id: "test_001".to_string(),
        };
        let ctx = component.log_context();

        assert_eq!(ctx.component, "Mock");
        assert_eq!(ctx.instance_id, "test_001");
        component.debug("exercised");
    }
}
