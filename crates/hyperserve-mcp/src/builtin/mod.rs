//! Built-in tools, registered only when explicitly enabled.

mod calculator;
mod fs;
mod http;

pub use calculator::CalculatorTool;
pub use fs::{ListDirectoryTool, ReadFileTool};
pub use http::HttpRequestTool;
