//! Execution time logging.

use std::fmt::Debug;
use std::future::Future;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Level a timing line is emitted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingPolicy {
    pub level: LogLevel,
    pub include_args: bool,
}

/// Run `op` once and log how long it took. The result is returned untouched.
pub async fn timed<T, E, F, Fut>(
    op: F,
    operation: &str,
    args: Option<&(dyn Debug + Sync)>,
    policy: &TimingPolicy,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let result = op().await;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let outcome = if result.is_ok() { "ok" } else { "error" };

    let args = match (policy.include_args, args) {
        (true, Some(args)) => Some(format!("{args:?}")),
        _ => None,
    };

    macro_rules! emit {
        ($mac:ident) => {
            match &args {
                Some(args) => tracing::$mac!(
                    operation,
                    elapsed_ms,
                    outcome,
                    args = %args,
                    "{} completed in {}ms",
                    operation,
                    elapsed_ms
                ),
                None => tracing::$mac!(
                    operation,
                    elapsed_ms,
                    outcome,
                    "{} completed in {}ms",
                    operation,
                    elapsed_ms
                ),
            }
        };
    }

    match policy.level {
        LogLevel::Trace => emit!(trace),
        LogLevel::Debug => emit!(debug),
        LogLevel::Info => emit!(info),
        LogLevel::Warn => emit!(warn),
        LogLevel::Error => emit!(error),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_passes_result_through() {
        let policy = TimingPolicy {
            level: LogLevel::Info,
            include_args: true,
        };
        let ok: Result<u32, String> = timed(|| async { Ok(7) }, "op", Some(&(1, "a")), &policy).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> =
            timed(|| async { Err("boom".to_string()) }, "op", None, &policy).await;
        assert_eq!(err, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_runs_once() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let _: Result<(), ()> = timed(
            || async {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(())
            },
            "sleepy",
            None,
            &TimingPolicy::default(),
        )
        .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    mod capture {
        use std::collections::HashMap;
        use std::fmt::Debug;
        use std::sync::{Arc, Mutex};

        use tracing::field::{Field, Visit};
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, Layer};

        #[derive(Debug, Clone)]
        pub struct Captured {
            pub level: Level,
            pub fields: HashMap<String, String>,
        }

        /// Layer that keeps every event it sees.
        #[derive(Clone, Default)]
        pub struct Capture(Arc<Mutex<Vec<Captured>>>);

        impl Capture {
            pub fn events(&self) -> Vec<Captured> {
                self.0.lock().unwrap().clone()
            }
        }

        struct Fields<'a>(&'a mut HashMap<String, String>);

        impl Visit for Fields<'_> {
            fn record_str(&mut self, field: &Field, value: &str) {
                self.0.insert(field.name().to_string(), value.to_string());
            }

            fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
                self.0.insert(field.name().to_string(), format!("{value:?}"));
            }
        }

        impl<S: Subscriber> Layer<S> for Capture {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                let mut fields = HashMap::new();
                event.record(&mut Fields(&mut fields));
                self.0.lock().unwrap().push(Captured {
                    level: *event.metadata().level(),
                    fields,
                });
            }
        }
    }

    async fn timed_lines(
        outcome: Result<u32, String>,
        args: Option<&(dyn Debug + Sync)>,
        policy: TimingPolicy,
    ) -> Vec<capture::Captured> {
        use tracing_subscriber::layer::SubscriberExt;

        let layer = capture::Capture::default();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let expected = outcome.clone();
        let result = timed(|| async move { outcome }, "Reports.render", args, &policy).await;
        assert_eq!(result, expected);

        layer
            .events()
            .into_iter()
            .filter(|e| e.fields.get("operation").map(String::as_str) == Some("Reports.render"))
            .collect()
    }

    fn assert_completion_message(line: &capture::Captured) {
        let message = &line.fields["message"];
        let millis = message
            .strip_prefix("Reports.render completed in ")
            .and_then(|rest| rest.strip_suffix("ms"))
            .unwrap_or_else(|| panic!("unexpected message: {message}"));
        assert!(millis.parse::<u64>().is_ok(), "unexpected message: {message}");
        assert_eq!(line.fields["elapsed_ms"], millis);
    }

    #[tokio::test]
    async fn test_logs_at_configured_level_with_args() {
        let policy = TimingPolicy {
            level: LogLevel::Info,
            include_args: true,
        };
        let lines = timed_lines(Ok(3), Some(&("ada", 7)), policy).await;

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, tracing::Level::INFO);
        assert_completion_message(&lines[0]);
        assert_eq!(lines[0].fields["outcome"], "ok");
        assert_eq!(lines[0].fields["args"], "(\"ada\", 7)");
    }

    #[tokio::test]
    async fn test_logs_failures_without_args() {
        let policy = TimingPolicy {
            level: LogLevel::Warn,
            include_args: false,
        };
        let lines = timed_lines(Err("boom".into()), Some(&("ada", 7)), policy).await;

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, tracing::Level::WARN);
        assert_completion_message(&lines[0]);
        assert_eq!(lines[0].fields["outcome"], "error");
        assert!(!lines[0].fields.contains_key("args"));
    }

    #[tokio::test]
    async fn test_each_level_maps_to_its_tracing_level() {
        let cases = [
            (LogLevel::Trace, tracing::Level::TRACE),
            (LogLevel::Debug, tracing::Level::DEBUG),
            (LogLevel::Error, tracing::Level::ERROR),
        ];
        for (level, expected) in cases {
            let policy = TimingPolicy {
                level,
                include_args: true,
            };
            let lines = timed_lines(Ok(1), None, policy).await;
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0].level, expected);
            assert!(!lines[0].fields.contains_key("args"));
        }
    }

    #[test]
    fn test_level_names() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
    }
}
