//! Conversation engine integration tests
//!
//! Drives whole turns against scripted providers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wakeline::conversation::{ConversationEngine, EngineSettings, Role};
use wakeline::protocol::ServerMessage;
use wakeline::providers::ChatDelta;
use wakeline::tools::Tool;

mod common;
use common::{
    BrokenTool, EchoTool, FakeStt, Round, ScriptedChat, StubWeather, registry, settings,
    text_round, tool_fragment,
};

const AUDIO: &[u8] = b"RIFF....WAVE";

fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn response(text: &str) -> ServerMessage {
    ServerMessage::Response {
        text: text.to_string(),
    }
}

fn transcription(text: &str) -> ServerMessage {
    ServerMessage::Transcription {
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_plain_turn_streams_deltas_then_done() {
    let stt = FakeStt::new("привет");
    let chat = ScriptedChat::replying(&["Hel", "lo"]);
    let engine = ConversationEngine::new(stt.clone(), chat.clone(), registry(vec![]), settings());

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            transcription("привет"),
            response("Hel"),
            response("lo"),
            ServerMessage::Done,
        ]
    );

    let history = engine.history().await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[1].role, Role::User);
    assert_eq!(history[1].content.as_deref(), Some("привет"));
    assert_eq!(history[2].role, Role::Assistant);
    assert_eq!(history[2].content.as_deref(), Some("Hello"));

    assert_eq!(stt.calls()[0].1, "audio/wav");
    assert!(chat.requests()[0].tools.is_empty());
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let echo = Arc::new(EchoTool::default());
    let chat = ScriptedChat::new(vec![
        Round::Deltas(vec![
            tool_fragment(0, Some("call_1"), Some("ec"), "{\"a\""),
            tool_fragment(0, None, Some("ho"), ":1}"),
        ]),
        text_round(&["Done!"]),
    ]);
    let tools = registry(vec![echo.clone() as Arc<dyn Tool>]);
    let engine = ConversationEngine::new(FakeStt::new("echo one"), chat.clone(), tools, settings());

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    assert_eq!(
        drain(&mut rx),
        vec![transcription("echo one"), response("Done!"), ServerMessage::Done]
    );
    assert_eq!(echo.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let history = engine.history().await;
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );

    let calls = history[2].tool_calls.as_ref().unwrap();
    assert!(history[2].content.is_none());
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function_name, "echo");
    assert_eq!(calls[0].arguments_json, "{\"a\":1}");

    assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
    let result: serde_json::Value =
        serde_json::from_str(history[3].content.as_deref().unwrap()).unwrap();
    assert_eq!(result["echo"]["a"], 1);
    assert_eq!(history[4].content.as_deref(), Some("Done!"));

    // The follow-up round sees the tool result and is not offered tools again
    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert!(requests[1].tools.is_empty());
    assert_eq!(requests[1].messages.last().unwrap().role, Role::Tool);
}

#[tokio::test]
async fn test_split_weather_call_runs_once() {
    let weather = Arc::new(StubWeather::default());
    let chat = ScriptedChat::new(vec![
        Round::Deltas(vec![
            tool_fragment(0, Some("call_w"), Some("get_w"), "{\"city\""),
            tool_fragment(0, None, Some("eather"), ":\"Paris\"}"),
        ]),
        text_round(&["Clear", " in Paris"]),
    ]);
    let tools = registry(vec![weather.clone() as Arc<dyn Tool>]);
    let engine = ConversationEngine::new(FakeStt::new("weather in paris"), chat, tools, settings());

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    assert_eq!(weather.calls(), vec![serde_json::json!({"city": "Paris"})]);

    let history = engine.history().await;
    let call = &history[2].tool_calls.as_ref().unwrap()[0];
    assert_eq!(call.function_name, "get_weather");
    assert_eq!(call.arguments_json, "{\"city\":\"Paris\"}");
    assert_eq!(history[4].content.as_deref(), Some("Clear in Paris"));

    let frames = drain(&mut rx);
    assert_eq!(frames.last(), Some(&ServerMessage::Done));
}

#[tokio::test]
async fn test_failing_tool_becomes_error_result() {
    let chat = ScriptedChat::new(vec![
        Round::Deltas(vec![tool_fragment(
            0,
            Some("call_w"),
            Some("get_weather"),
            "{\"city\":\"Paris\"}",
        )]),
        text_round(&["Sorry, no weather right now."]),
    ]);
    let tools = registry(vec![Arc::new(BrokenTool) as Arc<dyn Tool>]);
    let engine = ConversationEngine::new(FakeStt::new("weather"), chat, tools, settings());

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    let frames = drain(&mut rx);
    assert!(!frames.iter().any(|f| matches!(f, ServerMessage::Error { .. })));
    assert_eq!(frames.last(), Some(&ServerMessage::Done));

    let history = engine.history().await;
    let tool_message = &history[3];
    assert_eq!(tool_message.role, Role::Tool);
    let result: serde_json::Value =
        serde_json::from_str(tool_message.content.as_deref().unwrap()).unwrap();
    assert!(result["error"]
        .as_str()
        .unwrap()
        .contains("weather service unavailable"));
}

#[tokio::test]
async fn test_unknown_tool_reports_not_found() {
    let chat = ScriptedChat::new(vec![
        Round::Deltas(vec![tool_fragment(0, Some("call_x"), Some("lookup"), "{}")]),
        text_round(&["I can't do that."]),
    ]);
    let engine = ConversationEngine::new(FakeStt::new("look it up"), chat, registry(vec![]), settings());

    let (tx, _rx) = mpsc::channel(32);
    let outcome = engine
        .process_utterance(AUDIO, "audio/wav", &tx)
        .await
        .unwrap();
    assert_eq!(outcome.response, "I can't do that.");

    let history = engine.history().await;
    assert!(history[3]
        .content
        .as_deref()
        .unwrap()
        .contains("function lookup not found"));
}

#[tokio::test]
async fn test_malformed_tool_call_is_skipped() {
    let echo = Arc::new(EchoTool::default());
    let chat = ScriptedChat::new(vec![Round::Deltas(vec![
        ChatDelta::text("Hmm"),
        tool_fragment(0, Some("call_1"), Some("echo"), "{\"a\":"),
    ])]);
    let tools = registry(vec![echo.clone() as Arc<dyn Tool>]);
    let engine = ConversationEngine::new(FakeStt::new("echo"), chat.clone(), tools, settings());

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    assert_eq!(
        drain(&mut rx),
        vec![transcription("echo"), response("Hmm"), ServerMessage::Done]
    );
    assert_eq!(echo.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(chat.requests().len(), 1);

    let history = engine.history().await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].content.as_deref(), Some("Hmm"));
    assert!(history[2].tool_calls.is_none());
}

#[tokio::test]
async fn test_transcription_failure_sends_error_and_done() {
    let chat = ScriptedChat::replying(&["unused"]);
    let engine = ConversationEngine::new(
        FakeStt::failing("bad audio"),
        chat.clone(),
        registry(vec![]),
        settings(),
    );

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[0], ServerMessage::Error { message } if message.contains("bad audio")));
    assert_eq!(frames[1], ServerMessage::Done);

    assert_eq!(engine.history().await.len(), 1);
    assert!(chat.requests().is_empty());
}

#[tokio::test]
async fn test_completion_failure_keeps_user_message() {
    let chat = ScriptedChat::new(vec![Round::Fail("quota exceeded".to_string())]);
    let engine = ConversationEngine::new(FakeStt::new("hello"), chat, registry(vec![]), settings());

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    let frames = drain(&mut rx);
    assert_eq!(frames[0], transcription("hello"));
    assert!(matches!(&frames[1], ServerMessage::Error { message } if message.contains("quota exceeded")));
    assert_eq!(frames[2], ServerMessage::Done);

    let history = engine.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::User);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_stream_hits_deadline() {
    let chat = ScriptedChat::new(vec![Round::Stall]);
    let engine = ConversationEngine::new(
        FakeStt::new("hello"),
        chat,
        registry(vec![]),
        EngineSettings {
            provider_timeout: Duration::from_secs(1),
            ..EngineSettings::default()
        },
    );

    let (tx, mut rx) = mpsc::channel(32);
    engine.handle_utterance(AUDIO, "audio/wav", &tx).await;

    let frames = drain(&mut rx);
    assert!(matches!(&frames[1], ServerMessage::Error { message } if message.contains("stalled")));
    assert_eq!(frames[2], ServerMessage::Done);
}

#[tokio::test]
async fn test_closed_client_abandons_stream() {
    let chat = ScriptedChat::replying(&["never", "seen"]);
    let engine = ConversationEngine::new(FakeStt::new("hello"), chat, registry(vec![]), settings());

    let (tx, rx) = mpsc::channel(32);
    drop(rx);

    let result = engine.process_utterance(AUDIO, "audio/wav", &tx).await;
    assert!(result.is_err());
    assert!(engine
        .history()
        .await
        .iter()
        .all(|m| m.role != Role::Assistant));
}

#[tokio::test]
async fn test_turns_share_history() {
    let chat = ScriptedChat::new(vec![text_round(&["first"]), text_round(&["second"])]);
    let engine = ConversationEngine::new(FakeStt::new("again"), chat.clone(), registry(vec![]), settings());

    let (tx, _rx) = mpsc::channel(32);
    engine.process_utterance(AUDIO, "audio/wav", &tx).await.unwrap();
    engine.process_utterance(AUDIO, "audio/wav", &tx).await.unwrap();

    let requests = chat.requests();
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert_eq!(requests[1].messages[2].content.as_deref(), Some("first"));
    assert_eq!(engine.history().await.len(), 5);
}
