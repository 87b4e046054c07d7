//! The tool-calling loop.
//!
//! One user turn runs as follows:
//!
//! ```text
//! user message ─▶ model (tools offered, choice auto)
//!                   │
//!        ┌──────────┴──────────┐
//!   tool calls              text ─▶ answer
//!        │
//!   run each call, append results, ask again
//!        │
//!   (after max_auto_invoke_attempts rounds)
//!        ▼
//!   model (no tools, choice none) ─▶ answer
//! ```
//!
//! Which tool to call is the model's decision. The kernel only executes it,
//! and a failing tool never ends the turn: the error text becomes the tool
//! result so the model can correct itself.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{AgentConfig, Config};
use crate::history::{ChatHistory, ToolCall};
use crate::index::VectorIndex;
use crate::llm::{ChatModel, FunctionChoice};
use crate::models::{RetrievalOverrides, RetrievedDocument, Thought};
use crate::plugins::register_plugins;
use crate::sql::SqlDatabase;
use crate::tools::{validate_params, FunctionFilter, ToolContext, ToolRegistry};

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub filter: FunctionFilter,
    pub max_auto_invoke_attempts: usize,
}

impl ExecutionSettings {
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            filter: FunctionFilter::only(agent.included_functions.iter().cloned()),
            max_auto_invoke_attempts: agent.max_auto_invoke_attempts.max(1),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: String,
    pub result: String,
}

/// The answer to a turn, with the trace of how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct KernelReply {
    pub content: String,
    pub invocations: Vec<ToolInvocation>,
    pub thoughts: Vec<Thought>,
    pub grounding_data: Vec<Vec<RetrievedDocument>>,
}

pub struct Kernel {
    model: Arc<dyn ChatModel>,
    registry: ToolRegistry,
    settings: ExecutionSettings,
}

impl Kernel {
    pub fn new(model: Arc<dyn ChatModel>, registry: ToolRegistry, settings: ExecutionSettings) -> Self {
        Self {
            model,
            registry,
            settings,
        }
    }

    /// Wire the plugins over both backends.
    pub fn create(
        config: &Config,
        sql: Arc<SqlDatabase>,
        index: Arc<VectorIndex>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let mut registry = ToolRegistry::new();
        register_plugins(
            &mut registry,
            sql,
            index,
            config.retrieval.context_keys.clone(),
        );
        tracing::debug!(
            "kernel ready: model {}, {} plugin functions",
            model.model_name(),
            registry.len()
        );
        Self::new(model, registry, ExecutionSettings::from_config(&config.agent))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Answer `input`, appending the whole exchange to `history`.
    pub async fn message(&self, input: &str, history: &mut ChatHistory) -> Result<String> {
        let reply = self
            .respond(input, history, RetrievalOverrides::default())
            .await?;
        Ok(reply.content)
    }

    pub async fn respond(
        &self,
        input: &str,
        history: &mut ChatHistory,
        overrides: RetrievalOverrides,
    ) -> Result<KernelReply> {
        history.add_user_message(input);
        let start = history.len();

        let ctx = ToolContext::new(overrides);
        let definitions = self.registry.definitions(&self.settings.filter);
        let mut invocations = Vec::new();

        for round in 1..=self.settings.max_auto_invoke_attempts {
            let turn = self
                .model
                .complete(history.messages(), &definitions, FunctionChoice::Auto)
                .await
                .context("Chat completion failed")?;

            if turn.tool_calls.is_empty() {
                let content = turn.content.unwrap_or_default();
                history.add_assistant_message(&content);
                return Ok(finish(content, invocations, ctx));
            }

            tracing::debug!(
                "round {}: model requested {} tool calls",
                round,
                turn.tool_calls.len()
            );
            history.add_assistant_tool_calls(turn.content, turn.tool_calls.clone());

            for call in &turn.tool_calls {
                tracing::info!(
                    "Tool {} needs to be called with parameters {}",
                    call.name,
                    call.arguments
                );
                let result = self.invoke(call, &ctx).await;
                tracing::info!("Tool {} called and returned {}", call.name, result);

                history.add_tool_result(&call.id, &call.name, &result);
                invocations.push(ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result,
                });
            }
        }

        tracing::debug!(
            "auto invoke limit reached after {} rounds; functions used: {:?}",
            self.settings.max_auto_invoke_attempts,
            history.tool_names_since(start)
        );

        let turn = self
            .model
            .complete(history.messages(), &[], FunctionChoice::None)
            .await
            .context("Chat completion failed")?;
        let content = turn.content.unwrap_or_default();
        history.add_assistant_message(&content);
        Ok(finish(content, invocations, ctx))
    }

    /// Run one call; every failure is turned into text for the model.
    async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let tool = match self.registry.find(&call.name) {
            Some(tool) if self.settings.filter.allows(&call.name) => tool,
            _ => {
                tracing::warn!("model called unavailable function {}", call.name);
                return format!("Error: function '{}' is not available", call.name);
            }
        };

        let params: Value = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => return format!("Error: arguments are not valid JSON: {}", e),
            }
        };

        let params = match validate_params(&tool.parameters_schema(), &params) {
            Ok(p) => p,
            Err(e) => return format!("Error: {}", e),
        };

        match tool.execute(params, ctx).await {
            Ok(Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(e) => {
                tracing::warn!("Tool {} failed: {:#}", call.name, e);
                format!("Error: {:#}", e)
            }
        }
    }
}

fn finish(content: String, invocations: Vec<ToolInvocation>, ctx: ToolContext) -> KernelReply {
    let trace = ctx.into_trace();
    KernelReply {
        content,
        invocations,
        thoughts: trace.thoughts,
        grounding_data: trace.grounding_data,
    }
}
