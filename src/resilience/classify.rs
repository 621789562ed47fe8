//! Failure classification.
//!
//! Retry allow/deny lists name failure *kinds*. An operation's error type
//! reports its kind through [`Classify`]; kinds may form a hierarchy by
//! overriding [`Classify::is_kind`], so a deny entry for `"io"` also covers
//! `"io.timed_out"`.

use std::collections::BTreeSet;

/// A failure that can be matched against kind names.
pub trait Classify {
    /// Most specific kind name of this failure.
    fn failure_kind(&self) -> &str;

    /// Whether this failure belongs to `kind`.
    fn is_kind(&self, kind: &str) -> bool {
        self.failure_kind() == kind
    }
}

impl Classify for std::io::Error {
    fn failure_kind(&self) -> &str {
        use std::io::ErrorKind;

        match std::io::Error::kind(self) {
            ErrorKind::NotFound => "io.not_found",
            ErrorKind::PermissionDenied => "io.permission_denied",
            ErrorKind::ConnectionRefused => "io.connection_refused",
            ErrorKind::ConnectionReset => "io.connection_reset",
            ErrorKind::ConnectionAborted => "io.connection_aborted",
            ErrorKind::TimedOut => "io.timed_out",
            ErrorKind::Interrupted => "io.interrupted",
            ErrorKind::WouldBlock => "io.would_block",
            ErrorKind::UnexpectedEof => "io.unexpected_eof",
            _ => "io",
        }
    }

    fn is_kind(&self, kind: &str) -> bool {
        kind == "io" || self.failure_kind() == kind
    }
}

/// Whether `failure` should be retried under the given allow/deny sets.
///
/// Deny wins over allow. An empty allow set allows every kind not denied.
pub fn is_retryable<E: Classify + ?Sized>(
    failure: &E,
    retry_on: &BTreeSet<String>,
    no_retry_on: &BTreeSet<String>,
) -> bool {
    if no_retry_on.iter().any(|kind| failure.is_kind(kind)) {
        return false;
    }
    if retry_on.is_empty() {
        return true;
    }
    retry_on.iter().any(|kind| failure.is_kind(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn kinds(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_sets_retry_everything() {
        let err = io::Error::new(io::ErrorKind::Other, "x");
        assert!(is_retryable(&err, &kinds(&[]), &kinds(&[])));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let both = kinds(&["io.timed_out"]);
        assert!(!is_retryable(&err, &both, &both));
    }

    #[test]
    fn test_allow_list_restricts() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        let allow = kinds(&["io.timed_out"]);

        assert!(is_retryable(&timeout, &allow, &kinds(&[])));
        assert!(!is_retryable(&missing, &allow, &kinds(&[])));
    }

    #[test]
    fn test_parent_kind_matches() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(err.is_kind("io"));
        assert!(!is_retryable(&err, &kinds(&[]), &kinds(&["io"])));
    }
}
