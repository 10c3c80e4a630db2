use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::EarthlinkConfig;
use crate::services::{Geocoder, HttpInsightService, InsightService, MapboxGeocoder};
use crate::session::Session;
use crate::tools::{OperationSettings, ToolCall, ToolCallResult, ToolContext, ToolRegistry};

/// One map session wired to its operations and collaborators.
pub struct SessionRuntime {
    pub config: EarthlinkConfig,
    pub session: Session,
    pub tool_registry: Arc<ToolRegistry>,
    context: ToolContext,
}

pub struct SessionRuntimeBuilder {
    config: EarthlinkConfig,
    insight: Option<Arc<dyn InsightService>>,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl SessionRuntimeBuilder {
    pub fn new(config: EarthlinkConfig) -> Self {
        Self {
            config,
            insight: None,
            geocoder: None,
        }
    }

    pub fn with_insight_service(mut self, insight: Arc<dyn InsightService>) -> Self {
        self.insight = Some(insight);
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub async fn build(self) -> Result<SessionRuntime> {
        let config = self.config;
        let timeout = Duration::from_secs(config.fetch_timeout_secs.max(1));

        let insight: Arc<dyn InsightService> = match self.insight {
            Some(insight) => insight,
            None => {
                tracing::info!("Insight service: {}", config.insight_api_url);
                Arc::new(
                    HttpInsightService::new(config.insight_api_url.clone(), timeout)
                        .context("Failed to create insight service client")?,
                )
            }
        };

        let geocoder: Arc<dyn Geocoder> = match self.geocoder {
            Some(geocoder) => geocoder,
            None => {
                let token = config.geocoder_access_token.clone().unwrap_or_default();
                if token.is_empty() {
                    tracing::warn!(
                        "No geocoder access token configured; place search and reverse geocoding will fail"
                    );
                }
                Arc::new(
                    MapboxGeocoder::new(config.geocoder_api_url.clone(), token, timeout)
                        .context("Failed to create geocoder client")?,
                )
            }
        };

        let tool_registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(tool_registry.clone(), insight, geocoder).await?;

        let session = Session::new(config.initial_view);
        let settings = OperationSettings::from_config(&config);
        let mut context = ToolContext::new(session.clone(), settings);
        context.disallowed_tools = config.disallowed_tools.clone();
        if !context.disallowed_tools.is_empty() {
            tracing::info!("Disabled operations: {:?}", context.disallowed_tools);
        }

        tracing::info!("Session {} ready", session.id());
        Ok(SessionRuntime {
            config,
            session,
            tool_registry,
            context,
        })
    }
}

impl SessionRuntime {
    pub async fn bootstrap(config: EarthlinkConfig) -> Result<Self> {
        SessionRuntimeBuilder::new(config).build().await
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub async fn call(&self, call: &ToolCall) -> ToolCallResult {
        self.tool_registry.execute_call(call, &self.context).await
    }

    /// Runs one agent turn: calls execute in order, each finishing
    /// (including its fetch) before the next starts.
    pub async fn run_turn(&self, calls: &[ToolCall]) -> Vec<ToolCallResult> {
        self.tool_registry.execute_calls(calls, &self.context).await
    }
}

pub async fn register_builtin_tools(
    tool_registry: Arc<ToolRegistry>,
    insight: Arc<dyn InsightService>,
    geocoder: Arc<dyn Geocoder>,
) -> Result<()> {
    use crate::tools::{
        compare::CompareLocationsTool,
        insight::{
            FindExtremeTool, FindNearbyTool, PointInsightTool, RegionInsightTool,
            TemporalTrendTool,
        },
        map::{ClearMapTool, GetMapStateTool, NavigateTool, SetSelectionTool, ShowOnMapTool},
        panel::{ClosePanelTool, TogglePanelViewTool},
        places::{ReverseGeocodeTool, SearchPlaceTool},
    };

    tool_registry.register(Arc::new(NavigateTool::new())).await;
    tool_registry.register(Arc::new(ShowOnMapTool::new())).await;
    tool_registry.register(Arc::new(SetSelectionTool::new())).await;
    tool_registry.register(Arc::new(ClearMapTool::new())).await;
    tool_registry.register(Arc::new(GetMapStateTool::new())).await;
    tool_registry
        .register(Arc::new(PointInsightTool::new(insight.clone())))
        .await;
    tool_registry
        .register(Arc::new(RegionInsightTool::new(insight.clone())))
        .await;
    tool_registry
        .register(Arc::new(FindExtremeTool::new(insight.clone())))
        .await;
    tool_registry
        .register(Arc::new(FindNearbyTool::new(insight.clone())))
        .await;
    tool_registry
        .register(Arc::new(TemporalTrendTool::new(insight.clone())))
        .await;
    tool_registry
        .register(Arc::new(CompareLocationsTool::new(insight, geocoder.clone())))
        .await;
    tool_registry
        .register(Arc::new(ReverseGeocodeTool::new(geocoder.clone())))
        .await;
    tool_registry
        .register(Arc::new(SearchPlaceTool::new(geocoder)))
        .await;
    tool_registry
        .register(Arc::new(TogglePanelViewTool::new()))
        .await;
    tool_registry.register(Arc::new(ClosePanelTool::new())).await;

    tracing::info!(
        "Tool registry initialized with {} built-in tools",
        tool_registry.list_names().await.len()
    );
    Ok(())
}
