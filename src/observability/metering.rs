//! Per-invocation metrics.
//!
//! # Metrics
//! For a metric name `<name>` (the configured name, else the policy key):
//! - `<name>.count` (counter): invocations, recorded before the call runs
//! - `<name>.time` (histogram, seconds): duration of successes and failures
//! - `<name>.exceptions` (counter): failures, labelled `exception=<kind>`
//!
//! Configured tags are attached as labels to all three.

use std::future::Future;
use std::time::Instant;

use metrics::{counter, histogram, Label};

use crate::resilience::Classify;

/// What [`metered`] records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPolicy {
    /// Metric name prefix. `None` uses the policy key.
    pub name: Option<String>,
    /// `(key, value)` labels attached to every metric.
    pub tags: Vec<(String, String)>,
    pub record_invocation_count: bool,
    pub record_execution_time: bool,
    pub record_exceptions: bool,
}

impl Default for MetricPolicy {
    fn default() -> Self {
        Self {
            name: None,
            tags: Vec::new(),
            record_invocation_count: true,
            record_execution_time: true,
            record_exceptions: true,
        }
    }
}

impl MetricPolicy {
    /// Name prefix for calls under `key`.
    pub fn metric_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }
}

/// Split a `key=value` tag on its first `=`. The key must not be empty.
pub fn parse_tag(tag: &str) -> Option<(String, String)> {
    match tag.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Some((key.trim().to_string(), value.trim().to_string()))
        }
        _ => None,
    }
}

/// Run `op` once and record its metrics under `name`. The result is
/// returned untouched.
pub async fn metered<T, E, F, Fut>(op: F, name: &str, policy: &MetricPolicy) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    if policy.record_invocation_count {
        counter!(format!("{name}.count"), &policy.tags).increment(1);
    }

    let start = Instant::now();
    let result = op().await;

    if policy.record_execution_time {
        histogram!(format!("{name}.time"), &policy.tags).record(start.elapsed().as_secs_f64());
    }

    if let Err(e) = &result {
        if policy.record_exceptions {
            let mut labels: Vec<Label> = policy.tags.iter().map(Label::from).collect();
            labels.push(Label::new("exception", e.failure_kind().to_string()));
            counter!(format!("{name}.exceptions"), labels).increment(1);
        }
    }

    result
}


#[cfg(test)]
mod tests {
    use super::recording::{record, Recorded};
    use super::*;
    use std::io;
    use std::time::Duration;

    fn tagged() -> MetricPolicy {
        MetricPolicy {
            tags: vec![("team".into(), "billing".into())],
            ..MetricPolicy::default()
        }
    }

    #[test]
    fn test_success_records_count_and_time() {
        let recorder = Recorded::default();
        let result: Result<u32, io::Error> = record(
            &recorder,
            metered(
                || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(5)
                },
                "Invoices.total",
                &tagged(),
            ),
        );

        assert_eq!(result.unwrap(), 5);
        assert_eq!(recorder.counter("Invoices.total.count{team=billing}"), Some(1));
        let times = recorder.samples("Invoices.total.time{team=billing}");
        assert_eq!(times.len(), 1);
        assert!(times[0] >= 0.02, "recorded {}s", times[0]);
        assert!(!recorder.names().iter().any(|n| n.starts_with("Invoices.total.exceptions")));
    }

    #[test]
    fn test_failure_records_exception_kind() {
        let recorder = Recorded::default();
        let policy = tagged();
        for _ in 0..2 {
            let result: Result<u32, io::Error> = record(
                &recorder,
                metered(
                    || async { Err(io::Error::from(io::ErrorKind::TimedOut)) },
                    "Invoices.total",
                    &policy,
                ),
            );
            assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
        }

        assert_eq!(recorder.counter("Invoices.total.count{team=billing}"), Some(2));
        assert_eq!(
            recorder.counter("Invoices.total.exceptions{exception=io.timed_out,team=billing}"),
            Some(2)
        );
        assert_eq!(recorder.samples("Invoices.total.time{team=billing}").len(), 2);
    }

    #[test]
    fn test_flags_switch_metrics_off() {
        let recorder = Recorded::default();
        let policy = MetricPolicy {
            record_invocation_count: false,
            record_execution_time: false,
            ..MetricPolicy::default()
        };
        let result: Result<(), io::Error> = record(
            &recorder,
            metered(
                || async { Err(io::Error::from(io::ErrorKind::NotFound)) },
                "Users.find",
                &policy,
            ),
        );

        assert!(result.is_err());
        assert_eq!(recorder.names(), vec!["Users.find.exceptions{exception=io.not_found}"]);
    }

    #[test]
    fn test_metric_name_falls_back_to_key() {
        let policy = MetricPolicy::default();
        assert_eq!(policy.metric_name("Users.find"), "Users.find");

        let named = MetricPolicy {
            name: Some("users.lookup".into()),
            ..MetricPolicy::default()
        };
        assert_eq!(named.metric_name("Users.find"), "users.lookup");
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("env=prod"), Some(("env".into(), "prod".into())));
        assert_eq!(parse_tag("url=a=b"), Some(("url".into(), "a=b".into())));
        assert_eq!(parse_tag("flag="), Some(("flag".into(), String::new())));
        assert_eq!(parse_tag("novalue"), None);
        assert_eq!(parse_tag("=prod"), None);
    }
}
