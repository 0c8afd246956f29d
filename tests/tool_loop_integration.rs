//! End-to-end turns through the tool loop against a live registry.

use std::sync::Arc;

use toolhost::agent::{FALLBACK_REPLY, ToolLoop, TurnOptions};
use toolhost::config::AgentConfig;
use toolhost::llm::ChatMessage;
use toolhost::provider::ToolResponse;
use toolhost::provider::builtin::{ClockProvider, EchoProvider};
use toolhost::registry::ProviderRegistry;
use toolhost::testing::{ScriptedLlm, ScriptedProvider, ScriptedTurn};

async fn registry_with_builtins() -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::new());
    registry
        .register_server(Arc::new(EchoProvider::new()))
        .await
        .unwrap();
    registry
        .register_server(Arc::new(ClockProvider::new()))
        .await
        .unwrap();
    registry
}

#[tokio::test]
async fn multi_step_turn_chains_tool_results() {
    let registry = registry_with_builtins().await;
    let llm = Arc::new(ScriptedLlm::new(vec![
        ScriptedTurn::Calls(vec![ScriptedTurn::call(
            1,
            "clock__now",
            serde_json::json!({}),
        )]),
        ScriptedTurn::Calls(vec![ScriptedTurn::call(
            2,
            "echo__ping",
            serde_json::json!({"note": "second step"}),
        )]),
        ScriptedTurn::Text("all done".into()),
    ]));
    let tool_loop = ToolLoop::new(llm.clone(), registry, AgentConfig::default());

    let outcome = tool_loop
        .run_turn(
            vec![ChatMessage::user("what time is it, then echo")],
            TurnOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.reply, "all done");
    assert_eq!(outcome.tools_used.len(), 2);
    assert_eq!(outcome.tools_used[0].name, "clock__now");
    assert!(outcome.tools_used[0].success);
    assert_eq!(outcome.tools_used[1].name, "echo__ping");
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn runaway_model_is_capped_and_gets_fallback() {
    let registry = registry_with_builtins().await;
    // The script's single tool-calling turn repeats until the cap.
    let llm = Arc::new(ScriptedLlm::new(vec![ScriptedTurn::Calls(vec![
        ScriptedTurn::call(1, "echo__ping", serde_json::json!({})),
    ])]));
    let config = AgentConfig::default();
    let cap = config.max_tool_iterations;
    let tool_loop = ToolLoop::new(llm.clone(), registry, config);

    let outcome = tool_loop
        .run_turn(vec![ChatMessage::user("go forever")], TurnOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.reply, FALLBACK_REPLY);
    assert_eq!(llm.calls() as usize, cap);
    assert_eq!(outcome.tools_used.len(), cap);
}

#[tokio::test]
async fn failed_tool_result_is_visible_to_the_model_not_fatal() {
    let registry = Arc::new(ProviderRegistry::new());
    registry
        .register_server(Arc::new(ScriptedProvider::new("db").with_tool(
            "query",
            "Run a query.",
            |_| Ok(ToolResponse::failure("connection refused")),
        )))
        .await
        .unwrap();

    let llm = Arc::new(ScriptedLlm::new(vec![
        ScriptedTurn::Calls(vec![ScriptedTurn::call(
            1,
            "db__query",
            serde_json::json!({"sql": "select 1"}),
        )]),
        ScriptedTurn::Text("the database is down".into()),
    ]));
    let tool_loop = ToolLoop::new(llm, registry, AgentConfig::default());

    let outcome = tool_loop
        .run_turn(vec![ChatMessage::user("query it")], TurnOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.reply, "the database is down");
    assert!(!outcome.tools_used[0].success);
    assert_eq!(outcome.tools_used[0].output, "connection refused");
}

#[tokio::test]
async fn audit_trail_preserves_inputs_and_order_across_iterations() {
    let registry = registry_with_builtins().await;
    let llm = Arc::new(ScriptedLlm::new(vec![
        ScriptedTurn::Calls(vec![
            ScriptedTurn::call(1, "echo__ping", serde_json::json!({"step": 1})),
            ScriptedTurn::call(2, "echo__ping", serde_json::json!({"step": 2})),
        ]),
        ScriptedTurn::Calls(vec![ScriptedTurn::call(
            3,
            "echo__ping",
            serde_json::json!({"step": 3}),
        )]),
        ScriptedTurn::Text("done".into()),
    ]));
    let tool_loop = ToolLoop::new(llm, registry, AgentConfig::default());

    let outcome = tool_loop
        .run_turn(vec![ChatMessage::user("steps")], TurnOptions::default())
        .await
        .unwrap();

    let steps: Vec<i64> = outcome
        .tools_used
        .iter()
        .map(|u| u.input["step"].as_i64().unwrap())
        .collect();
    assert_eq!(steps, vec![1, 2, 3]);
}
