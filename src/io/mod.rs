//! External capability adapters: source fetching and archive extraction.

pub mod extract;
pub mod fetch;
