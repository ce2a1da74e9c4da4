//! A set of built-in tools that models can use.

mod calculator;
mod shell;

pub use calculator::CalculatorTool;
pub use shell::ShellTool;
