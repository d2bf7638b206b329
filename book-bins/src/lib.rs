//! Shared code for the `book-aggregator`/`book-aggregator-demo` binaries.

pub mod common;
