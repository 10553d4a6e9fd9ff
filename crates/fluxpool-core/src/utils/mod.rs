//! Time source and text sanitization helpers.

pub mod clock;
pub mod sanitize;

pub use clock::{Clock, FixedClock, SystemClock};
pub use sanitize::{sanitize_and_truncate, sanitize_sensitive_text, truncate_with_ellipsis};
