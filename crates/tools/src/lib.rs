//! Built-in tool implementations for Toolloop.
//!
//! A small, deterministic set of tools for exercising the step loop without
//! network access: a weather lookup, a temperature converter, a clock, and a
//! client-side confirmation tool that the loop hands back to the caller.

pub mod clock;
pub mod confirm;
pub mod convert_temperature;
pub mod weather;

use toolloop_core::error::ToolError;
use toolloop_core::tool::ToolCatalog;

pub use clock::ClockTool;
pub use confirm::confirm_tool;
pub use convert_temperature::ConvertTemperatureTool;
pub use weather::WeatherTool;

/// Create a catalog with all built-in tools.
pub fn default_catalog() -> Result<ToolCatalog, ToolError> {
    ToolCatalog::new()
        .with(WeatherTool)?
        .with(ConvertTemperatureTool)?
        .with(ClockTool)?
        .with(confirm_tool())
}
