//! Redaction for values that must never reach a log sink verbatim.

use std::fmt;

pub const REDACTED: &str = "==REDACTED==";

/// Wraps a secret so that `Debug` and `Display` print [`REDACTED`].
///
/// Empty values print as empty, so "header was present but blank" is still
/// distinguishable from "header carried a credential".
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Sensitive<T>(pub T);

impl<T: AsRef<[u8]>> Sensitive<T> {
    fn is_empty(&self) -> bool {
        self.0.as_ref().is_empty()
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            Ok(())
        } else {
            f.write_str(REDACTED)
        }
    }
}

impl<T: AsRef<[u8]>> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}
