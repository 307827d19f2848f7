//! Confirmation tool: answered by the user, not by the runtime.
//!
//! It has a schema but no executor, so a run that calls it stops with the
//! call pending and the caller supplies the answer as a tool result.

use toolloop_core::tool::ClientTool;

pub fn confirm_tool() -> ClientTool {
    ClientTool::new(
        "confirm",
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The yes/no question to put to the user"
                }
            },
            "required": ["question"]
        }),
    )
    .with_description("Ask the user to confirm an action before continuing.")
}
