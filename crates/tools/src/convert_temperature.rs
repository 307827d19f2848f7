//! Temperature conversion between celsius, fahrenheit and kelvin.

use async_trait::async_trait;
use toolloop_core::error::ToolError;
use toolloop_core::tool::Tool;

pub struct ConvertTemperatureTool;

#[async_trait]
impl Tool for ConvertTemperatureTool {
    fn name(&self) -> &str {
        "convert_temperature"
    }

    fn description(&self) -> Option<&str> {
        Some("Convert a temperature between celsius, fahrenheit and kelvin.")
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "value": { "type": "number" },
                "from": { "type": "string", "enum": ["celsius", "fahrenheit", "kelvin"] },
                "to": { "type": "string", "enum": ["celsius", "fahrenheit", "kelvin"] }
            },
            "required": ["value", "from", "to"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let value = arguments["value"]
            .as_f64()
            .ok_or_else(|| ToolError::failed(self.name(), "'value' must be a number"))?;
        let from = arguments["from"].as_str().unwrap_or_default();
        let to = arguments["to"].as_str().unwrap_or_default();

        let kelvin = match from {
            "celsius" => value + 273.15,
            "fahrenheit" => (value - 32.0) * 5.0 / 9.0 + 273.15,
            "kelvin" => value,
            other => return Err(ToolError::failed(self.name(), format!("unknown unit '{other}'"))),
        };
        if kelvin < 0.0 {
            return Err(ToolError::failed(self.name(), "temperature is below absolute zero"));
        }

        let converted = match to {
            "celsius" => kelvin - 273.15,
            "fahrenheit" => (kelvin - 273.15) * 9.0 / 5.0 + 32.0,
            "kelvin" => kelvin,
            other => return Err(ToolError::failed(self.name(), format!("unknown unit '{other}'"))),
        };

        Ok(serde_json::json!({
            "value": (converted * 100.0).round() / 100.0,
            "unit": to,
        }))
    }
}
