//! Clock tool: the current date and time.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use toolloop_core::error::ToolError;
use toolloop_core::tool::Tool;

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> Option<&str> {
        Some("Get the current date and time, optionally at a fixed UTC offset.")
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "integer",
                    "minimum": -12,
                    "maximum": 14,
                    "default": 0
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let hours = arguments["utc_offset_hours"].as_i64().unwrap_or(0);
        let offset = i32::try_from(hours * 3600)
            .ok()
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ToolError::failed(self.name(), format!("invalid offset {hours}h")))?;

        let now = Utc::now().with_timezone(&offset);
        Ok(serde_json::json!({
            "iso8601": now.to_rfc3339(),
            "weekday": now.format("%A").to_string(),
            "utc_offset_hours": hours,
        }))
    }
}
