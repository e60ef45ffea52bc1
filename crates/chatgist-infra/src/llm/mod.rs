//! Model adapters.

pub mod gemini;
