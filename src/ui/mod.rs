//! User-facing progress output.

mod reporter;

pub use reporter::{ConsoleReporter, NullReporter, Reporter};
