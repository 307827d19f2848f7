//! Weather tool: deterministic mock weather data.
//!
//! Returns plausible weather derived from the location name, so multi-step
//! runs can be reproduced end-to-end without network access.

use async_trait::async_trait;
use serde::Serialize;
use toolloop_core::error::ToolError;
use toolloop_core::tool::Tool;

pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> Option<&str> {
        Some("Get the current weather in a location. Returns temperature, conditions and humidity.")
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city or location to get the weather for"
                },
                "unit": {
                    "type": "string",
                    "enum": ["celsius", "fahrenheit"],
                    "description": "Temperature unit",
                    "default": "celsius"
                }
            },
            "required": ["location"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let location = arguments["location"]
            .as_str()
            .ok_or_else(|| ToolError::failed(self.name(), "missing 'location'"))?;
        let unit = arguments["unit"].as_str().unwrap_or("celsius");

        let report = mock_weather(location, unit);
        serde_json::to_value(&report).map_err(|e| ToolError::failed(self.name(), e))
    }
}

#[derive(Debug, Serialize)]
struct WeatherReport {
    location: String,
    temperature: f64,
    unit: String,
    conditions: &'static str,
    humidity: u32,
}

/// Deterministic weather keyed on a hash of the location name.
fn mock_weather(location: &str, unit: &str) -> WeatherReport {
    const CONDITIONS: [&str; 6] = [
        "Clear skies",
        "Partly cloudy",
        "Overcast",
        "Light rain",
        "Snow",
        "Foggy",
    ];

    let hash = location
        .to_lowercase()
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let celsius = ((hash % 40) as f64) - 5.0;
    let temperature = if unit == "fahrenheit" {
        celsius * 9.0 / 5.0 + 32.0
    } else {
        celsius
    };

    WeatherReport {
        location: location.to_string(),
        temperature: (temperature * 10.0).round() / 10.0,
        unit: unit.to_string(),
        conditions: CONDITIONS[(hash as usize / 7) % CONDITIONS.len()],
        humidity: 30 + (hash % 60),
    }
}
