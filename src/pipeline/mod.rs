//! Relay pipeline.
//!
//! Every observed source message flows through:
//! 1. `parser::parse()` — free text to code + link
//! 2. `filter::check()` — banned-term rejection
//! 3. `DedupGate::admit()` — exactly-once admission per window
//! 4. `Broadcaster::broadcast()` — fan-out to eligible targets
//!
//! `processor::Relay` wires the stages together.

pub mod filter;
pub mod parser;
pub mod processor;
pub mod types;

pub use processor::Relay;
pub use types::{GrammarTag, Outcome, ParsedCode, SourceMessage};
