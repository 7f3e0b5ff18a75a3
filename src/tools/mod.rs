//! Built-in toolkits.

pub mod calculator;

pub use calculator::calculator_toolkit;
