//! Built-in adaptors.

pub mod filter;
pub mod fixture_source;
pub mod log_sink;

pub use filter::Filter;
pub use fixture_source::FixtureSource;
pub use log_sink::LogSink;
