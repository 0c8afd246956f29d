//! The bounded tool-calling loop.
//!
//! One user turn is: call the model with the visible tools, execute any
//! requested calls through the registry, feed the results back, repeat.
//! The loop is bounded; a model that never stops calling tools gets a
//! fixed fallback reply instead of an error or an unbounded bill.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::agent::visibility::VisibilityPolicy;
use crate::config::AgentConfig;
use crate::error::Error;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, Role, ToolCall, ToolCompletionRequest,
    ToolDefinition,
};
use crate::provider::parse_tool_id;
use crate::registry::{ActionResult, ProviderRegistry};

/// Reply returned when the model is still requesting tools at the
/// iteration cap.
pub const FALLBACK_REPLY: &str =
    "I was unable to complete this request within the allowed number of tool calls. \
     Please try rephrasing or breaking it into smaller steps.";

/// Appended to a tool output that exceeded the size cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

const NUDGE: &str = "You are close to the tool call limit for this turn. \
     Finish up: answer with text now unless one more tool call is strictly necessary.";

/// One tool execution recorded for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    /// Namespaced tool id as the model requested it.
    pub name: String,
    pub input: serde_json::Value,
    /// Output after truncation, exactly as it entered the history.
    pub output: String,
    pub success: bool,
}

/// Result of one full turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Unique id for correlating this turn's log lines and audit trail.
    pub turn_id: uuid::Uuid,
    pub reply: String,
    pub tools_used: Vec<ToolUsage>,
}

/// Per-turn options.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub enable_tools: bool,
    /// Capability filter; `None` means everything is allowed.
    pub enabled_capabilities: Option<Vec<String>>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            enable_tools: true,
            enabled_capabilities: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Drives turns against one model and one registry.
pub struct ToolLoop {
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ProviderRegistry>,
    policy: VisibilityPolicy,
    config: AgentConfig,
}

impl ToolLoop {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        registry: Arc<ProviderRegistry>,
        config: AgentConfig,
    ) -> Self {
        let policy = VisibilityPolicy::new(config.max_visible_tools);
        Self {
            llm,
            registry,
            policy,
            config,
        }
    }

    pub fn with_policy(mut self, policy: VisibilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one turn to completion.
    ///
    /// Only model failures escape as `Err`; every tool failure is folded
    /// into the conversation as a structured result the model can react to.
    pub async fn run_turn(
        &self,
        mut messages: Vec<ChatMessage>,
        options: TurnOptions,
    ) -> Result<TurnOutcome, Error> {
        let turn_id = uuid::Uuid::new_v4();
        tracing::debug!(%turn_id, "Starting turn");

        let visible = if options.enable_tools {
            let catalog = self.registry.all_tools().await;
            let query = last_user_message(&messages).to_string();
            self.policy
                .select(&catalog, options.enabled_capabilities.as_deref(), &query)
        } else {
            Vec::new()
        };

        // No tools to offer: a single plain completion is the whole turn.
        if visible.is_empty() {
            let response = self
                .llm
                .complete(CompletionRequest {
                    messages,
                    temperature: options.temperature,
                    max_tokens: options.max_tokens,
                })
                .await?;
            return Ok(TurnOutcome {
                turn_id,
                reply: response.content,
                tools_used: Vec::new(),
            });
        }

        let definitions: Vec<ToolDefinition> = visible
            .iter()
            .map(|(id, descriptor)| ToolDefinition {
                name: id.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.input_schema.clone(),
            })
            .collect();

        let max_iterations = self.config.max_tool_iterations;
        let nudge_at = max_iterations.saturating_sub(1).max(1);
        let mut tools_used: Vec<ToolUsage> = Vec::new();

        for iteration in 1..=max_iterations {
            // Warn the model once, just before the last allowed round trip.
            if iteration == nudge_at && max_iterations > 1 {
                messages.push(ChatMessage::system(NUDGE));
            }

            let response = self
                .llm
                .complete_with_tools(ToolCompletionRequest {
                    messages: messages.clone(),
                    tools: definitions.clone(),
                    temperature: options.temperature,
                    max_tokens: options.max_tokens,
                    tool_choice: None,
                })
                .await?;

            if response.tool_calls.is_empty() {
                return Ok(TurnOutcome {
                    turn_id,
                    reply: response.content.unwrap_or_default(),
                    tools_used,
                });
            }

            let calls = response.tool_calls;
            tracing::debug!(%turn_id, iteration, calls = calls.len(), "Model requested tool calls");

            // The assistant message requesting the calls goes into history
            // before any of the results.
            messages.push(ChatMessage::assistant_with_tool_calls(
                response.content,
                calls.clone(),
            ));

            let results = self.execute_calls(&calls).await;
            for (call, result) in calls.iter().zip(results) {
                let output = truncate_output(result.as_text(), self.config.tool_output_cap);
                messages.push(ChatMessage::tool_result(&call.id, &call.name, &output));
                tools_used.push(ToolUsage {
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                    output,
                    success: result.success,
                });
            }
        }

        tracing::warn!(
            %turn_id,
            max_iterations,
            "Turn hit the tool iteration cap; returning fallback reply"
        );
        Ok(TurnOutcome {
            turn_id,
            reply: FALLBACK_REPLY.to_string(),
            tools_used,
        })
    }

    /// Execute a batch of calls, concurrently when there is more than one,
    /// and return results in request order.
    ///
    /// Namespaced ids are resolved here: a malformed id becomes a failed
    /// result for that one call without touching the registry.
    async fn execute_calls(&self, calls: &[ToolCall]) -> Vec<ActionResult> {
        let mut slots: Vec<Option<ActionResult>> = calls.iter().map(|_| None).collect();

        if calls.len() <= 1 {
            for (idx, call) in calls.iter().enumerate() {
                slots[idx] =
                    Some(resolve_and_execute(&self.registry, call.name.clone(), call.arguments.clone()).await);
            }
        } else {
            let mut join_set = JoinSet::new();
            for (idx, call) in calls.iter().enumerate() {
                let registry = Arc::clone(&self.registry);
                let call = call.clone();
                join_set.spawn(async move {
                    (idx, resolve_and_execute(&registry, call.name, call.arguments).await)
                });
            }
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((idx, result)) => slots[idx] = Some(result),
                    Err(e) => {
                        tracing::error!(error = %e, "Tool execution task failed");
                    }
                }
            }
        }

        // Panicked tasks leave holes; fill them with structured failures.
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| ActionResult::failed("tool task failed")))
            .collect()
    }
}

/// Resolve a namespaced tool id and route the call to its provider.
async fn resolve_and_execute(
    registry: &ProviderRegistry,
    tool_id: String,
    args: serde_json::Value,
) -> ActionResult {
    let Some((provider, tool)) = parse_tool_id(&tool_id) else {
        return ActionResult::failed(format!(
            "invalid tool id '{tool_id}': expected provider__tool"
        ));
    };
    registry.execute_action(provider, tool, args).await
}

fn last_user_message(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

fn truncate_output(text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => {
            let mut out = text[..byte_idx].to_string();
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolResponse;
    use crate::testing::{CrashyProvider, ScriptedLlm, ScriptedProvider, ScriptedTurn, StubLlm};
    use pretty_assertions::assert_eq;

    fn small_config(max_tool_iterations: usize) -> AgentConfig {
        AgentConfig {
            max_tool_iterations,
            ..AgentConfig::default()
        }
    }

    async fn echo_registry() -> Arc<ProviderRegistry> {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register_server(Arc::new(ScriptedProvider::new("echo").with_tool(
                "ping",
                "Echo.",
                |args| Ok(ToolResponse::success(args)),
            )))
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn plain_answer_short_circuits_after_one_call() {
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedTurn::Text("hi".into())]));
        let registry = echo_registry().await;
        let tool_loop = ToolLoop::new(llm.clone(), registry, AgentConfig::default());

        let outcome = tool_loop
            .run_turn(vec![ChatMessage::user("hello")], TurnOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.reply, "hi");
        assert!(outcome.tools_used.is_empty());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn tool_call_round_trip_records_usage() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedTurn::Calls(vec![ScriptedTurn::call(
                1,
                "echo__ping",
                serde_json::json!({"x": 1}),
            )]),
            ScriptedTurn::Text("done".into()),
        ]));
        let registry = echo_registry().await;
        let tool_loop = ToolLoop::new(llm.clone(), registry, AgentConfig::default());

        let outcome = tool_loop
            .run_turn(
                vec![ChatMessage::user("ping please")],
                TurnOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.reply, "done");
        assert_eq!(outcome.tools_used.len(), 1);
        let usage = &outcome.tools_used[0];
        assert_eq!(usage.name, "echo__ping");
        assert!(usage.success);
        assert!(usage.output.contains("\"x\":1"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn parallel_results_come_back_in_request_order() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register_server(Arc::new(
                ScriptedProvider::new("multi")
                    .with_tool("first", "First.", |_| {
                        Ok(ToolResponse::success(serde_json::json!("one")))
                    })
                    .with_tool("second", "Second.", |_| {
                        Ok(ToolResponse::success(serde_json::json!("two")))
                    }),
            ))
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedTurn::Calls(vec![
                ScriptedTurn::call(1, "multi__first", serde_json::json!({})),
                ScriptedTurn::call(2, "multi__second", serde_json::json!({})),
            ]),
            ScriptedTurn::Text("done".into()),
        ]));
        let tool_loop = ToolLoop::new(llm, registry, AgentConfig::default());

        let outcome = tool_loop
            .run_turn(vec![ChatMessage::user("both")], TurnOptions::default())
            .await
            .unwrap();

        let names: Vec<&str> = outcome.tools_used.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["multi__first", "multi__second"]);
        assert_eq!(outcome.tools_used[0].output, "one");
        assert_eq!(outcome.tools_used[1].output, "two");
    }

    #[tokio::test]
    async fn malformed_tool_id_becomes_failed_usage_not_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedTurn::Calls(vec![ScriptedTurn::call(
                1,
                "not-namespaced",
                serde_json::json!({}),
            )]),
            ScriptedTurn::Text("recovered".into()),
        ]));
        let registry = echo_registry().await;
        let tool_loop = ToolLoop::new(llm, registry, AgentConfig::default());

        let outcome = tool_loop
            .run_turn(vec![ChatMessage::user("go")], TurnOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.reply, "recovered");
        assert_eq!(outcome.tools_used.len(), 1);
        assert!(!outcome.tools_used[0].success);
        assert!(outcome.tools_used[0].output.contains("invalid tool id"));
    }

    #[tokio::test]
    async fn crashed_provider_is_isolated_into_a_failed_result() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register_server(Arc::new(CrashyProvider::new("flaky")))
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedTurn::Calls(vec![ScriptedTurn::call(
                1,
                "flaky__doomed",
                serde_json::json!({}),
            )]),
            ScriptedTurn::Text("moving on".into()),
        ]));
        let tool_loop = ToolLoop::new(llm, registry, AgentConfig::default());

        let outcome = tool_loop
            .run_turn(vec![ChatMessage::user("go")], TurnOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.reply, "moving on");
        assert!(!outcome.tools_used[0].success);
        assert!(outcome.tools_used[0].output.contains("shutting down"));
    }

    #[tokio::test]
    async fn iteration_cap_yields_fallback_reply() {
        // One scripted tool-call turn repeats forever.
        let llm = Arc::new(ScriptedLlm::new(vec![ScriptedTurn::Calls(vec![
            ScriptedTurn::call(1, "echo__ping", serde_json::json!({})),
        ])]));
        let registry = echo_registry().await;
        let tool_loop = ToolLoop::new(llm.clone(), registry, small_config(3));

        let outcome = tool_loop
            .run_turn(vec![ChatMessage::user("loop")], TurnOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.reply, FALLBACK_REPLY);
        assert_eq!(llm.calls(), 3);
        assert_eq!(outcome.tools_used.len(), 3);
    }

    #[tokio::test]
    async fn tools_disabled_uses_plain_completion() {
        let llm = Arc::new(StubLlm::new("plain"));
        let registry = echo_registry().await;
        let tool_loop = ToolLoop::new(llm.clone(), registry, AgentConfig::default());

        let outcome = tool_loop
            .run_turn(
                vec![ChatMessage::user("hello")],
                TurnOptions {
                    enable_tools: false,
                    ..TurnOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.reply, "plain");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn empty_capability_set_means_no_tools() {
        let llm = Arc::new(StubLlm::new("no tools for you"));
        let registry = echo_registry().await;
        let tool_loop = ToolLoop::new(llm.clone(), registry, AgentConfig::default());

        let outcome = tool_loop
            .run_turn(
                vec![ChatMessage::user("hello")],
                TurnOptions {
                    enabled_capabilities: Some(Vec::new()),
                    ..TurnOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.reply, "no tools for you");
        assert!(outcome.tools_used.is_empty());
    }

    #[tokio::test]
    async fn oversized_tool_output_is_truncated_with_marker() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register_server(Arc::new(ScriptedProvider::new("big").with_tool(
                "dump",
                "Big output.",
                |_| {
                    Ok(ToolResponse::success(serde_json::Value::String(
                        "x".repeat(40_000),
                    )))
                },
            )))
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedTurn::Calls(vec![ScriptedTurn::call(
                1,
                "big__dump",
                serde_json::json!({}),
            )]),
            ScriptedTurn::Text("ok".into()),
        ]));
        let config = AgentConfig::default();
        let cap = config.tool_output_cap;
        let tool_loop = ToolLoop::new(llm, registry, config);

        let outcome = tool_loop
            .run_turn(vec![ChatMessage::user("dump")], TurnOptions::default())
            .await
            .unwrap();

        let output = &outcome.tools_used[0].output;
        assert_eq!(output.len(), cap + TRUNCATION_MARKER.len());
        assert!(output.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn llm_failure_propagates_as_error() {
        let llm = Arc::new(StubLlm::failing());
        let registry = echo_registry().await;
        let tool_loop = ToolLoop::new(llm, registry, AgentConfig::default());

        let result = tool_loop
            .run_turn(vec![ChatMessage::user("hello")], TurnOptions::default())
            .await;
        assert!(matches!(result, Err(Error::Llm(_))));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        let truncated = truncate_output(text, 5);
        assert!(truncated.starts_with(&"é".repeat(5)));
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_output("short".to_string(), 100), "short");
    }
}
