//! One-shot log filter.
//!
//! Streaming failures (a texture that 404s on every extension, a server
//! that times out) tend to repeat every frame; the error design calls for
//! logging each distinct failure once. `first_occurrence` tracks failure
//! signatures process-wide.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

static SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Returns `true` exactly once per distinct `signature`.
pub fn first_occurrence(signature: &str) -> bool {
    let seen = SEEN.get_or_init(|| Mutex::new(HashSet::new()));
    match seen.lock() {
        Ok(mut set) => {
            if set.contains(signature) {
                false
            } else {
                set.insert(signature.to_string());
                true
            }
        }
        // A poisoned set only means some log line may repeat.
        Err(_) => true,
    }
}

/// `warn!` that fires once per signature.
///
/// ```ignore
/// warn_once!(format!("texture:{}", name), "no candidate found for {}", name);
/// ```
#[macro_export]
macro_rules! warn_once {
    ($signature:expr, $($arg:tt)*) => {
        if $crate::log_once::first_occurrence(&$signature) {
            log::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_signature_fires_once() {
        assert!(first_occurrence("log_once-test-a"));
        assert!(!first_occurrence("log_once-test-a"));
        assert!(first_occurrence("log_once-test-b"));
        assert!(!first_occurrence("log_once-test-a"));
    }
}
