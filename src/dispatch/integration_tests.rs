//! End-to-end dispatch tests against a scripted model and real registry.
//!
//! The model is a `MockChatModel` whose responder looks at the request, so
//! each test controls when tools are called and what the final answer is.

#![cfg(test)]

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use super::{Dispatcher, Query, ToolSelection};
use crate::chat::{ChatMessage, ChatOptions, Generation, GenerationRequest, MockChatModel, ToolCall};
use crate::error::DispatchError;
use crate::memory::{ChatMemory, MessageWindowMemory};
use crate::tools::test_support::{EchoTool, FailingTool};
use crate::tools::{CityTimeTool, ToolRegistry};
use crate::types::ConversationId;

fn last_tool_result(request: &GenerationRequest) -> Option<String> {
    match request.messages.last() {
        Some(ChatMessage::Tool { content, .. }) => Some(content.clone()),
        _ => None,
    }
}

/// Calls `tool` with `args` once, then answers with the tool's output.
fn calls_tool_then_answers(tool: &'static str, args: serde_json::Value) -> MockChatModel {
    MockChatModel::new(move |request| {
        Ok(match last_tool_result(request) {
            Some(result) => Generation::text(format!("Answer: {}", result)),
            None => Generation::tool_calls(vec![ToolCall::new("call_1", tool, args.to_string())]),
        })
    })
}

struct Fixture {
    model: Arc<MockChatModel>,
    echo_calls: Arc<std::sync::atomic::AtomicUsize>,
    dispatcher: Dispatcher,
}

fn fixture(model: MockChatModel) -> Fixture {
    let echo = EchoTool::new();
    let echo_calls = echo.calls.clone();
    let registry = ToolRegistry::new()
        .register_handler(CityTimeTool::new())
        .unwrap()
        .register_handler(echo)
        .unwrap()
        .register_handler(FailingTool)
        .unwrap();

    let model = Arc::new(model);
    let dispatcher = Dispatcher::new(model.clone(), Arc::new(registry));
    Fixture {
        model,
        echo_calls,
        dispatcher,
    }
}

#[tokio::test]
async fn test_city_time_by_schema() {
    let f = fixture(calls_tool_then_answers("getCityTime", json!({"timeZoneId": "Asia/Shanghai"})));

    let answer = f
        .dispatcher
        .respond(Query::new("What time is it in Asia/Shanghai?"), ToolSelection::BySchema)
        .await
        .unwrap();
    assert!(answer.contains("Asia/Shanghai"), "{}", answer);

    let requests = f.model.requests();
    assert_eq!(requests.len(), 2);
    // Every registered tool is offered.
    assert_eq!(requests[0].tools.len(), 3);

    let tool_messages: Vec<_> = requests[1]
        .messages
        .iter()
        .filter(|m| m.role() == "tool")
        .collect();
    assert_eq!(tool_messages.len(), 1);
    assert!(
        tool_messages[0]
            .content()
            .starts_with("The current time zone is Asia/Shanghai and the current time is ")
    );
}

#[tokio::test]
async fn test_no_tools_offered_with_selection_none() {
    let f = fixture(MockChatModel::with_text("hello"));
    let answer = f
        .dispatcher
        .respond(Query::new("hi"), ToolSelection::None)
        .await
        .unwrap();
    assert_eq!(answer, "hello");
    assert!(f.model.requests()[0].tools.is_empty());
}

#[tokio::test]
async fn test_by_name_offers_only_named_tools() {
    let f = fixture(calls_tool_then_answers("echo", json!({"text": "hi"})));
    let answer = f
        .dispatcher
        .respond(Query::new("say hi"), ToolSelection::by_name(["echo", "echo"]))
        .await
        .unwrap();
    assert_eq!(answer, "Answer: echo: hi");

    let offered = &f.model.requests()[0].tools;
    assert_eq!(offered.len(), 1);
    assert_eq!(offered[0].name.as_str(), "echo");
}

#[tokio::test]
async fn test_unknown_tool_by_name_fails_before_any_work() {
    let f = fixture(calls_tool_then_answers("echo", json!({"text": "hi"})));
    let selection = ToolSelection::by_name(["echo", "doesNotExist"]);

    let err = f
        .dispatcher
        .respond(Query::new("hi"), selection.clone())
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownTool("doesNotExist".into()));

    let err = f
        .dispatcher
        .respond_stream(Query::new("hi"), selection)
        .await
        .err()
        .unwrap();
    assert_eq!(err, DispatchError::UnknownTool("doesNotExist".into()));

    assert_eq!(f.model.call_count(), 0);
    assert_eq!(f.echo_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_model_calling_unoffered_tool() {
    let f = fixture(calls_tool_then_answers("alwaysFails", json!({})));
    let err = f
        .dispatcher
        .respond(Query::new("hi"), ToolSelection::by_name(["echo"]))
        .await
        .unwrap_err();
    assert_eq!(err.root(), &DispatchError::UnknownTool("alwaysFails".into()));
    // The caller asked for nothing wrong; the model did.
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let f = fixture(MockChatModel::with_text("unused"));
    let err = f
        .dispatcher
        .respond(Query::new("   "), ToolSelection::None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_query");
    assert_eq!(f.model.call_count(), 0);
}

#[tokio::test]
async fn test_schema_violation_never_executes() {
    let f = fixture(calls_tool_then_answers("echo", json!({"text": 42})));
    let err = f
        .dispatcher
        .respond(Query::new("echo a number"), ToolSelection::BySchema)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), DispatchError::ArgumentValidation { tool, .. } if tool.as_str() == "echo"));
    assert!(!err.is_client_error());
    assert_eq!(f.echo_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unparseable_arguments() {
    let model = MockChatModel::scripted(vec![Generation::tool_calls(vec![ToolCall::new(
        "call_1",
        "echo",
        "{\"text\": ",
    )])]);
    let f = fixture(model);
    let err = f
        .dispatcher
        .respond(Query::new("hi"), ToolSelection::BySchema)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "argument_validation");
}

#[tokio::test]
async fn test_invalid_zone_is_argument_validation() {
    let f = fixture(calls_tool_then_answers("getCityTime", json!({"timeZoneId": "Nowhere/Special"})));
    let err = f
        .dispatcher
        .respond(Query::new("time?"), ToolSelection::BySchema)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "argument_validation");
}

#[tokio::test]
async fn test_tool_failure_is_surfaced_not_retried() {
    let f = fixture(calls_tool_then_answers("alwaysFails", json!({})));
    let err = f
        .dispatcher
        .respond(Query::new("try it"), ToolSelection::BySchema)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::ToolExecution {
            tool: "alwaysFails".into(),
            reason: "backend unavailable".to_string()
        }
    );
    assert_eq!(f.model.call_count(), 1);
}

#[tokio::test]
async fn test_upstream_failure() {
    let f = fixture(MockChatModel::scripted(Vec::new()));
    let err = f
        .dispatcher
        .respond(Query::new("hi"), ToolSelection::None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "upstream_generation");
}

#[tokio::test]
async fn test_round_limit() {
    let model = MockChatModel::new(|_| {
        Ok(Generation::tool_calls(vec![ToolCall::new(
            "call_x",
            "echo",
            r#"{"text":"again"}"#,
        )]))
    });
    let f = fixture(model);
    let dispatcher = f.dispatcher.clone().with_max_tool_rounds(2);

    let err = dispatcher
        .respond(Query::new("loop"), ToolSelection::BySchema)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("tool round limit"), "{}", err);
    assert_eq!(f.model.call_count(), 3);
    // Later rounds reuse the first output.
    assert_eq!(f.echo_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_each_tool_runs_at_most_once_per_query() {
    let model = MockChatModel::new(|request| {
        Ok(match last_tool_result(request) {
            Some(_) => Generation::text("done"),
            None => Generation::tool_calls(vec![
                ToolCall::new("call_a", "echo", r#"{"text":"a"}"#),
                ToolCall::new("call_b", "echo", r#"{"text":"b"}"#),
            ]),
        })
    });
    let f = fixture(model);

    let answer = f
        .dispatcher
        .respond(Query::new("echo twice"), ToolSelection::BySchema)
        .await
        .unwrap();
    assert_eq!(answer, "done");
    assert_eq!(f.echo_calls.load(Ordering::SeqCst), 1);

    // Both calls still get a result, matched by call id.
    let results: Vec<(String, String)> = f.model.requests()[1]
        .messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::Tool {
                tool_call_id, content, ..
            } => Some((tool_call_id.to_string(), content.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        results,
        vec![
            ("call_a".to_string(), "echo: a".to_string()),
            ("call_b".to_string(), "echo: a".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_stream_concatenates_to_sync_answer() {
    let responder = || calls_tool_then_answers("echo", json!({"text": "streaming works"}));

    let sync = fixture(responder())
        .dispatcher
        .respond(Query::new("go"), ToolSelection::BySchema)
        .await
        .unwrap();

    let f = fixture(responder().with_fragment_chars(2));
    let mut stream = f
        .dispatcher
        .respond_stream(Query::new("go"), ToolSelection::BySchema)
        .await
        .unwrap();

    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment.unwrap());
    }
    assert!(fragments.len() > 1);
    assert_eq!(fragments.concat(), sync);
}

#[tokio::test]
async fn test_stream_error_is_final_item() {
    let model = MockChatModel::new(|request| {
        Ok(match last_tool_result(request) {
            Some(_) => Generation::text("unreachable"),
            None => Generation {
                content: "Checking... ".to_string(),
                tool_calls: vec![ToolCall::new("call_1", "alwaysFails", "{}")],
            },
        })
    });
    let f = fixture(model);
    let mut stream = f
        .dispatcher
        .respond_stream(Query::new("go"), ToolSelection::BySchema)
        .await
        .unwrap();

    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }
    let (last, text) = items.split_last().unwrap();
    assert_eq!(last.clone().unwrap_err().kind(), "tool_execution");
    let text: String = text.iter().map(|i| i.clone().unwrap()).collect();
    assert_eq!(text, "Checking... ");
}

#[tokio::test]
async fn test_collect_text_reports_error() {
    let f = fixture(MockChatModel::scripted(Vec::new()));
    let err = f
        .dispatcher
        .respond_stream(Query::new("go"), ToolSelection::None)
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "upstream_generation");
}

#[tokio::test]
async fn test_conversation_memory_scenario() {
    let model = MockChatModel::new(|request| {
        let knows_name = request
            .messages
            .iter()
            .any(|m| m.role() == "user" && m.content().contains("My name is Alice"));
        let last = request.messages.last().map(|m| m.content().to_string()).unwrap_or_default();
        Ok(Generation::text(if last.contains("What is my name") {
            if knows_name { "Your name is Alice." } else { "I don't know." }
        } else {
            "Nice to meet you."
        }))
    });
    let memory = Arc::new(MessageWindowMemory::new());
    let f = fixture(model);
    let dispatcher = f.dispatcher.clone().with_memory(memory.clone());

    let first = dispatcher
        .respond_stream(Query::new("My name is Alice").with_conversation("123"), ToolSelection::None)
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    assert_eq!(first, "Nice to meet you.");

    // Memory is written by the producer after the last fragment; wait for it.
    let id = ConversationId::new("123");
    for _ in 0..50 {
        if memory.history(&id).await.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let second = dispatcher
        .respond(Query::new("What is my name?").with_conversation("123"), ToolSelection::None)
        .await
        .unwrap();
    assert_eq!(second, "Your name is Alice.");

    // Another conversation does not see it.
    let other = dispatcher
        .respond(Query::new("What is my name?").with_conversation("456"), ToolSelection::None)
        .await
        .unwrap();
    assert_eq!(other, "I don't know.");

    let history = memory.history(&id).await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[3].content(), "Your name is Alice.");
}

#[tokio::test]
async fn test_dropping_stream_cancels_production() {
    let long_answer = "x".repeat(2000);
    let memory = Arc::new(MessageWindowMemory::new());
    let f = fixture(MockChatModel::with_text(long_answer).with_fragment_chars(1));
    let dispatcher = f.dispatcher.clone().with_memory(memory.clone());

    let mut stream = dispatcher
        .respond_stream(Query::new("go").with_conversation("c"), ToolSelection::None)
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "x");
    drop(stream);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(memory.history(&ConversationId::new("c")).await.is_empty());
}

#[tokio::test]
async fn test_system_prompt_and_options() {
    let f = fixture(MockChatModel::with_text("ok"));
    let dispatcher = f
        .dispatcher
        .clone()
        .with_system_prompt("You are a helpful assistant.")
        .with_default_options(ChatOptions {
            temperature: Some(0.7),
            top_p: Some(0.9),
            ..Default::default()
        });

    let options = ChatOptions {
        top_p: Some(0.8),
        max_tokens: Some(64),
        ..Default::default()
    };
    dispatcher
        .respond(Query::new("hi").with_options(options), ToolSelection::None)
        .await
        .unwrap();

    let request = &f.model.requests()[0];
    assert_eq!(request.messages[0].role(), "system");
    assert_eq!(request.messages[1].content(), "hi");
    assert_eq!(request.options.top_p, Some(0.8));
    assert_eq!(request.options.temperature, Some(0.7));
    assert_eq!(request.options.max_tokens, Some(64));
}
