use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

pub struct TogglePanelViewTool;

impl TogglePanelViewTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for TogglePanelViewTool {
    fn name(&self) -> &str {
        "toggle_panel_view"
    }

    fn description(&self) -> &str {
        "Switch the side panel back to the previous view (e.g. from a comparison to the earlier insight). \
         Does nothing if there is no previous view."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let session = &ctx.session;
        if !session.toggle_panel() {
            return Ok(ToolOutput::Json(json!({
                "status": "success",
                "toggled": false,
                "message": "There is no previous panel view to switch to.",
            })));
        }
        session.open_panel();
        Ok(ToolOutput::Json(json!({
            "status": "success",
            "toggled": true,
            "showing": session.panel_current().map(|e| e.content.kind()),
            "previous": session.panel_alternate().map(|e| e.content.kind()),
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Panel
    }
}

pub struct ClosePanelTool;

impl ClosePanelTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ClosePanelTool {
    fn name(&self) -> &str {
        "close_panel"
    }

    fn description(&self) -> &str {
        "Hide the side panel. Its content is kept and reappears with the next result."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let was_open = ctx.session.panel_is_open();
        ctx.session.close_panel();
        Ok(ToolOutput::Json(json!({
            "status": "success",
            "was_open": was_open,
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Panel
    }
}
