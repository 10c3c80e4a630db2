//! Agent-invocable map operations.
//!
//! Each operation is a [`Tool`]: a named function with a JSON Schema for its
//! arguments. An operation resolves omitted arguments from the current
//! selection, optionally awaits one collaborator call, and then writes to
//! the session stores. Within one operation, resolution happens before the
//! fetch and the fetch before the write; nothing else is ordered.
//!
//! Failures the agent should talk about ("no selection", "lookup failed")
//! are returned as [`ToolOutput::Error`], never as `Err`.

pub mod args;
pub mod compare;
pub mod insight;
pub mod map;
pub mod panel;
pub mod places;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{EarthlinkConfig, StaleResultPolicy};
use crate::session::panel::PanelContent;
use crate::session::Session;

/// Category of operation, used for grouping in tool listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolCategory {
    /// Camera, highlights and selection
    Map,
    /// Calls into the insight data service
    Insight,
    /// Place search and reverse geocoding
    Places,
    /// Side panel control
    Panel,
}

/// The result of executing a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolOutput {
    /// Successful text output
    Text(String),
    /// Successful structured output
    Json(Value),
    /// Soft failure the agent should relay conversationally
    Error(String),
}

impl ToolOutput {
    /// Convert to a string representation suitable for feeding back to the LLM
    pub fn to_llm_string(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Json(v) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
            ToolOutput::Error(e) => format!("[ERROR] {}", e),
        }
    }

    /// Structured form: JSON passes through, text and errors are wrapped
    /// with a `status` discriminator.
    pub fn to_json(&self) -> Value {
        match self {
            ToolOutput::Text(s) => json!({ "status": "success", "message": s }),
            ToolOutput::Json(v) => v.clone(),
            ToolOutput::Error(e) => json!({ "status": "error", "error": e }),
        }
    }

    /// Returns true if this output represents success (Text or Json)
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutput::Text(_) | ToolOutput::Json(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolOutput::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Tunables the operations read; lifted out of [`EarthlinkConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSettings {
    /// Half-size in degrees of the bbox synthesized around a selected point.
    pub region_fallback_half_size_deg: f64,
    pub poi_relevance_threshold: f64,
    pub stale_results: StaleResultPolicy,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self::from_config(&EarthlinkConfig::default())
    }
}

impl OperationSettings {
    pub fn from_config(config: &EarthlinkConfig) -> Self {
        Self {
            region_fallback_half_size_deg: config.region_fallback_half_size_deg,
            poi_relevance_threshold: config.geocoder_poi_relevance_threshold,
            stale_results: config.stale_results,
        }
    }
}

/// Context passed to tools during execution
#[derive(Clone)]
pub struct ToolContext {
    /// The session every operation reads and writes
    pub session: Session,
    pub settings: OperationSettings,
    /// If set, only these tool names are callable in this context (case-insensitive)
    pub allowed_tools: Option<Vec<String>>,
    /// Tool names that are not callable in this context (case-insensitive)
    pub disallowed_tools: Vec<String>,
}

impl ToolContext {
    pub fn new(session: Session, settings: OperationSettings) -> Self {
        Self {
            session,
            settings,
            allowed_tools: None,
            disallowed_tools: Vec::new(),
        }
    }

    pub fn allows_tool(&self, tool_name: &str) -> bool {
        if self
            .disallowed_tools
            .iter()
            .any(|name| name.eq_ignore_ascii_case(tool_name))
        {
            return false;
        }

        match &self.allowed_tools {
            Some(allowed) => allowed
                .iter()
                .any(|name| name.eq_ignore_ascii_case(tool_name)),
            None => true,
        }
    }

    /// Selection epoch a panel write must still match, or `None` if the
    /// write applies unconditionally. Only writes whose target came from
    /// the selection are guarded.
    pub fn stale_guard(&self, from_selection: bool, epoch: u64) -> Option<u64> {
        match self.settings.stale_results {
            StaleResultPolicy::Discard if from_selection => Some(epoch),
            _ => None,
        }
    }

    /// Pushes `content` into the panel and opens it, unless the stale
    /// policy discards the write. Returns whether the panel changed.
    pub fn show_in_panel(
        &self,
        content: PanelContent,
        keep_previous: bool,
        from_selection: bool,
        epoch: u64,
    ) -> bool {
        let guard = self.stale_guard(from_selection, epoch);
        let kind = content.kind();
        match self
            .session
            .set_panel_content_if_current(content, keep_previous, guard)
        {
            Some(_) => {
                self.session.open_panel();
                true
            }
            None => {
                tracing::debug!(
                    "Discarded stale {} result: selection changed since epoch {}",
                    kind,
                    epoch
                );
                false
            }
        }
    }
}

const STALE_NOTE: &str =
    "The user changed their map selection while this was loading, so the panel was left as is.";

/// Success payload, flagged `stale` when the panel write was discarded.
pub(crate) fn panel_result(mut payload: Value, shown: bool) -> ToolOutput {
    if !shown {
        payload["stale"] = Value::Bool(true);
        payload["note"] = Value::String(STALE_NOTE.to_string());
    }
    ToolOutput::Json(payload)
}

/// An operation the agent can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in function-calling (e.g., "navigate", "show_on_map")
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    ///
    /// This is used directly in OpenAI-format function definitions.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Category for grouping
    fn category(&self) -> ToolCategory {
        ToolCategory::Map
    }
}

/// OpenAI-format function definition for LLM function-calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// OpenAI-format tool definition (wraps FunctionDef)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// A tool call issued by the agent runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    json!({})
}

/// Result of a tool call, ready to feed back to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub name: String,
    pub output: ToolOutput,
}

/// Thread-safe registry of tools available to the agent.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::info!(
            "Registered tool: {} (category: {:?})",
            name,
            tool.category()
        );
        self.tools.write().await.insert(name, tool);
    }

    /// Remove a tool by name.
    pub async fn deregister(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Generate OpenAI-format tool definitions for all registered tools.
    pub async fn tool_definitions(&self) -> Vec<ToolDef> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDef> = tools.values().map(|tool| tool_def(tool.as_ref())).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Generate tool definitions filtered by execution context policy.
    pub async fn tool_definitions_for_context(&self, ctx: &ToolContext) -> Vec<ToolDef> {
        self.tool_definitions()
            .await
            .into_iter()
            .filter(|def| ctx.allows_tool(&def.function.name))
            .collect()
    }

    /// Execute one tool call. Never fails: unknown tools, disabled tools and
    /// execution errors all come back as `ToolOutput::Error`.
    pub async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> ToolCallResult {
        if !ctx.allows_tool(&call.name) {
            return ToolCallResult {
                name: call.name.clone(),
                output: ToolOutput::Error(format!(
                    "Tool '{}' is disabled for this context",
                    call.name
                )),
            };
        }

        let tool = match self.get(&call.name).await {
            Some(t) => t,
            None => {
                return ToolCallResult {
                    name: call.name.clone(),
                    output: ToolOutput::Error(format!("Unknown tool: {}", call.name)),
                };
            }
        };

        let arguments = match &call.arguments {
            Value::Null => json!({}),
            // Some runtimes deliver arguments as a JSON-encoded string.
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| json!({})),
            other => other.clone(),
        };

        tracing::debug!("Executing tool '{}' with {}", call.name, arguments);
        let output = match tool.execute(arguments, ctx).await {
            Ok(output) => output,
            Err(e) => ToolOutput::Error(format!("Tool execution failed: {}", e)),
        };
        if let Some(message) = output.error_message() {
            tracing::warn!("Tool '{}' returned soft error: {}", call.name, message);
        }

        ToolCallResult {
            name: call.name.clone(),
            output,
        }
    }

    /// Execute a turn's tool calls strictly in order: each call, including
    /// its awaited fetch, completes before the next begins.
    pub async fn execute_calls(
        &self,
        calls: &[ToolCall],
        ctx: &ToolContext,
    ) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_call(call, ctx).await);
        }
        results
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn tool_def(tool: &dyn Tool) -> ToolDef {
    ToolDef {
        tool_type: "function".to_string(),
        function: FunctionDef {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input message"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo"
                    }
                },
                "required": ["message"]
            })
        }

        async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            let message = params["message"].as_str().unwrap_or("(no message)");
            Ok(ToolOutput::Text(message.to_string()))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            anyhow::bail!("boom")
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Insight
        }
    }

    #[tokio::test]
    async fn test_registry_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        assert!(registry.get("echo").await.is_some());
        assert!(registry.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_tool_definitions_format() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let defs = registry.tool_definitions().await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].tool_type, "function");
        assert_eq!(defs[0].function.name, "echo");

        let json = serde_json::to_string(&defs).unwrap();
        assert!(json.contains("echo"));
    }

    #[tokio::test]
    async fn test_execute_echo_tool() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let call = ToolCall {
            name: "echo".to_string(),
            arguments: json!({"message": "hello"}),
        };

        let result = registry.execute_call(&call, &test_ctx()).await;
        assert_eq!(result.name, "echo");
        assert!(result.output.is_success());
        assert_eq!(result.output.to_llm_string(), "hello");
    }

    #[tokio::test]
    async fn test_string_encoded_arguments_are_decoded() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let call = ToolCall {
            name: "echo".to_string(),
            arguments: Value::String(r#"{"message": "from string"}"#.to_string()),
        };
        let result = registry.execute_call(&call, &test_ctx()).await;
        assert_eq!(result.output.to_llm_string(), "from string");
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_error() {
        let registry = ToolRegistry::new();

        let call = ToolCall {
            name: "nonexistent".to_string(),
            arguments: json!({}),
        };

        let result = registry.execute_call(&call, &test_ctx()).await;
        assert!(!result.output.is_success());
        assert!(result.output.to_llm_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_execution_error_becomes_soft_error() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool)).await;

        let call = ToolCall {
            name: "failing".to_string(),
            arguments: json!({}),
        };
        let result = registry.execute_call(&call, &test_ctx()).await;
        assert_eq!(
            result.output.to_json(),
            json!({"status": "error", "error": "Tool execution failed: boom"})
        );
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        assert!(registry.get("echo").await.is_some());

        registry.deregister("echo").await;
        assert!(registry.get("echo").await.is_none());
    }

    #[tokio::test]
    async fn test_context_tool_allowlist_blocks_other_tools() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        registry.register(Arc::new(FailingTool)).await;

        let call = ToolCall {
            name: "failing".to_string(),
            arguments: json!({}),
        };

        let mut ctx = test_ctx();
        ctx.allowed_tools = Some(vec!["echo".to_string()]);

        let result = registry.execute_call(&call, &ctx).await;
        assert!(matches!(result.output, ToolOutput::Error(_)));
        assert!(result.output.to_llm_string().contains("disabled"));

        let defs = registry.tool_definitions_for_context(&ctx).await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "echo");
    }

    #[tokio::test]
    async fn test_execute_calls_preserves_order() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let calls: Vec<ToolCall> = ["a", "b", "c"]
            .iter()
            .map(|m| ToolCall {
                name: "echo".to_string(),
                arguments: json!({ "message": m }),
            })
            .collect();
        let results = registry.execute_calls(&calls, &test_ctx()).await;
        let outputs: Vec<_> = results.iter().map(|r| r.output.to_llm_string()).collect();
        assert_eq!(outputs, vec!["a", "b", "c"]);
    }

    #[test]
    fn stale_guard_only_applies_to_selection_fallbacks() {
        let mut ctx = test_ctx();
        assert_eq!(ctx.stale_guard(true, 4), Some(4));
        assert_eq!(ctx.stale_guard(false, 4), None);
        ctx.settings.stale_results = StaleResultPolicy::LastWriteWins;
        assert_eq!(ctx.stale_guard(true, 4), None);
    }
}
