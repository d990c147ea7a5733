//! Session-level tests: reconciliation, retry by replay and the in-flight guard

mod common;

use byok_core::error::{ChatError, ErrorKind, ReplayError, ValidationError};
use byok_core::config::SecretString;
use byok_core::protocol::{Attachment, MessageRole, NewApiKey};
use byok_core::ChatEvent;
use bytes::Bytes;
use common::{
    content, done, drain, json_body, key_json, message_json, session, sse, Reply,
    ScriptedTransport,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;

fn with_openai_key(transport: &ScriptedTransport) {
    transport.on(
        "GET /api-keys",
        Reply::Json(json!([key_json("k1", "openai", "gpt-4", true)])),
    );
}

fn first_exchange() -> serde_json::Value {
    json!([
        message_json("u1", "user", "hi", 1),
        message_json("a1", "assistant", "Hello!", 2)
    ])
}

#[tokio::test]
async fn test_first_send_activates_new_thread_and_refetches() {
    let transport = ScriptedTransport::new();
    with_openai_key(&transport);
    transport.on(
        "POST /chat",
        Reply::Stream(vec![sse(&[content("Hello"), content("!"), done(Some("t1"))])]),
    );
    transport.on("GET /threads/t1/messages", Reply::Json(first_exchange()));

    let (session, mut rx) = session(transport.clone());
    session.set_compose("hi");
    let outcome = session.send().await.unwrap();

    assert_eq!(outcome.content, "Hello!");
    assert_eq!(session.active_thread().as_deref(), Some("t1"));
    assert!(session.conversation().compose.is_empty());

    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, MessageRole::Assistant);

    let events = drain(&mut rx);
    assert!(events.contains(&ChatEvent::ThreadCreated {
        thread_id: "t1".to_string()
    }));
    assert!(events.contains(&ChatEvent::HistoryRefreshed {
        thread_id: "t1".to_string(),
        count: 2
    }));
    let created = events
        .iter()
        .position(|e| matches!(e, ChatEvent::ThreadCreated { .. }))
        .unwrap();
    let refreshed = events
        .iter()
        .position(|e| matches!(e, ChatEvent::HistoryRefreshed { .. }))
        .unwrap();
    assert!(created < refreshed);
}

#[tokio::test]
async fn test_failed_send_leaves_history_and_compose() {
    let transport = ScriptedTransport::new();
    with_openai_key(&transport);
    transport.on("GET /threads/t1/messages", Reply::Json(first_exchange()));
    transport.on(
        "POST /chat",
        Reply::Stream(vec![sse(&[content("par"), json!({"error": "upstream overloaded"})])]),
    );

    let (session, mut rx) = session(transport.clone());
    session.open_thread("t1").await.unwrap();
    session.set_compose("follow up");
    let before = session.conversation();
    drain(&mut rx);

    let err = session.send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamProtocol);
    assert_eq!(session.conversation(), before);
    assert_eq!(session.conversation().compose.text, "follow up");

    let events = drain(&mut rx);
    assert!(events.contains(&ChatEvent::Failed {
        kind: ErrorKind::StreamProtocol,
        notice: "upstream overloaded".to_string()
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ChatEvent::HistoryRefreshed { .. })));
    assert!(!session.is_sending());
}

#[tokio::test]
async fn test_retry_replays_preceding_user_message() {
    let transport = ScriptedTransport::new();
    with_openai_key(&transport);
    transport.on("GET /threads/t1/messages", Reply::Json(first_exchange()));
    transport.on(
        "POST /chat",
        Reply::Stream(vec![sse(&[content("Hi there"), done(None)])]),
    );
    transport.on(
        "GET /threads/t1/messages",
        Reply::Json(json!([
            message_json("u1", "user", "hi", 1),
            message_json("a1", "assistant", "Hello!", 2),
            message_json("u2", "user", "hi", 3),
            message_json("a2", "assistant", "Hi there", 4)
        ])),
    );

    let (session, _rx) = session(transport.clone());
    session.open_thread("t1").await.unwrap();
    session.set_compose("unrelated draft");

    let outcome = session.retry("a1").await.unwrap();
    assert_eq!(outcome.thread_id, "t1");
    assert!(!outcome.created_thread);

    let chat = transport.requests_to("POST /chat");
    assert_eq!(chat.len(), 1);
    let body = json_body(&chat[0]);
    assert_eq!(body["message"], "hi");
    assert_eq!(body["thread_id"], "t1");

    let messages = session.messages();
    assert_eq!(messages.len(), 4);
    assert!(messages.iter().any(|m| m.id == "a1"));
    assert_eq!(session.conversation().compose.text, "unrelated draft");
}

#[tokio::test]
async fn test_retry_of_invalid_targets_dispatches_nothing() {
    let transport = ScriptedTransport::new();
    transport.on(
        "GET /threads/t1/messages",
        Reply::Json(json!([
            message_json("s1", "system", "be brief", 0),
            message_json("a0", "assistant", "Welcome", 1),
            message_json("u1", "user", "hi", 2)
        ])),
    );

    let (session, mut rx) = session(transport.clone());
    session.open_thread("t1").await.unwrap();
    drain(&mut rx);

    let orphan = session.retry("a0").await.unwrap_err();
    assert!(matches!(
        orphan,
        ChatError::Replay(ReplayError::NoPrecedingUserMessage { .. })
    ));

    let unknown = session.retry("nope").await.unwrap_err();
    assert!(matches!(
        unknown,
        ChatError::Replay(ReplayError::MessageNotFound { .. })
    ));

    let user = session.retry("u1").await.unwrap_err();
    assert!(matches!(
        user,
        ChatError::Replay(ReplayError::NotAssistant { .. })
    ));

    assert!(transport.requests_to("POST /chat").is_empty());
    let failures = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ChatEvent::Failed { kind: ErrorKind::Replay, .. }))
        .count();
    assert_eq!(failures, 3);
}

#[tokio::test]
async fn test_retry_without_active_thread() {
    let transport = ScriptedTransport::new();
    let (session, _rx) = session(transport.clone());
    let err = session.retry("a1").await.unwrap_err();
    assert!(matches!(err, ChatError::Replay(ReplayError::NoActiveThread)));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_second_send_while_in_flight_is_rejected() {
    let transport = ScriptedTransport::new();
    with_openai_key(&transport);
    let gate = Arc::new(Notify::new());
    transport.on(
        "POST /chat",
        Reply::Gated(
            gate.clone(),
            Box::new(Reply::Json(json!({"content": "ok", "done": true, "thread_id": "t1"}))),
        ),
    );
    transport.on("GET /threads/t1/messages", Reply::Json(first_exchange()));

    let (session, _rx) = session(transport.clone());
    session.set_compose("hi");

    let (first, second) = tokio::join!(session.send(), async {
        while !session.is_sending() {
            tokio::task::yield_now().await;
        }
        let rejected = session.send().await;
        gate.notify_one();
        rejected
    });

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(ChatError::Validation(ValidationError::SendInProgress))
    ));
    assert_eq!(transport.requests_to("POST /chat").len(), 1);
    assert!(!session.is_sending());
}

#[tokio::test]
async fn test_provider_change_invalidates_key_cache() {
    let transport = ScriptedTransport::new();
    for _ in 0..2 {
        transport.on(
            "GET /api-keys",
            Reply::Json(json!([
                key_json("k1", "openai", "gpt-4", true),
                key_json("k2", "anthropic", "claude-3-opus", true)
            ])),
        );
    }
    for thread in ["t1", "t2", "t3"] {
        transport.on(
            "POST /chat",
            Reply::Json(json!({"content": "ok", "done": true, "thread_id": thread})),
        );
        transport.on(
            &format!("GET /threads/{}/messages", thread),
            Reply::Json(json!([])),
        );
    }

    let (session, _rx) = session(transport.clone());
    for _ in 0..2 {
        session.start_new_thread();
        session.set_compose("hi");
        session.send().await.unwrap();
    }
    assert_eq!(transport.requests_to("GET /api-keys").len(), 1);
    assert_eq!(session.key_cache().cached_provider().as_deref(), Some("openai"));

    session.select_model("Anthropic", "claude-3-opus");
    assert!(session.key_cache().cached_provider().is_none());

    session.start_new_thread();
    session.set_compose("hi");
    session.send().await.unwrap();
    assert_eq!(transport.requests_to("GET /api-keys").len(), 2);

    let body = json_body(&transport.requests_to("POST /chat")[2]);
    assert_eq!(body["api_key_id"], "k2");
    assert_eq!(body["provider"], "Anthropic");
}

fn openai_key() -> NewApiKey {
    NewApiKey {
        provider: "openai".to_string(),
        model_name: "gpt-4".to_string(),
        api_key: SecretString::new("sk-test-0123456789"),
        key_name: "work".to_string(),
    }
}

#[tokio::test]
async fn test_key_added_after_credential_error_is_used() {
    let transport = ScriptedTransport::new();
    transport.on("GET /api-keys", Reply::Json(json!([])));
    transport.on(
        "POST /api-keys",
        Reply::Json(key_json("k1", "openai", "gpt-4", true)),
    );
    transport.on(
        "GET /api-keys",
        Reply::Json(json!([key_json("k1", "openai", "gpt-4", true)])),
    );
    transport.on(
        "POST /chat",
        Reply::Stream(vec![sse(&[content("Hello!"), done(Some("t1"))])]),
    );
    transport.on("GET /threads/t1/messages", Reply::Json(first_exchange()));

    let (session, mut rx) = session(transport.clone());
    session.set_compose("hi");
    let err = session.send().await.unwrap_err();
    assert!(matches!(err, ChatError::Credential { ref provider } if provider == "openai"));
    assert!(transport.requests_to("POST /chat").is_empty());
    assert_eq!(session.conversation().compose.text, "hi");

    let created = session.add_key(&openai_key()).await.unwrap();
    assert_eq!(created.id, "k1");

    let outcome = session.send().await.unwrap();
    assert_eq!(outcome.content, "Hello!");
    assert_eq!(transport.requests_to("GET /api-keys").len(), 2);
    assert_eq!(json_body(&transport.requests_to("POST /chat")[0])["api_key_id"], "k1");

    let events = drain(&mut rx);
    assert!(events.contains(&ChatEvent::Failed {
        kind: ErrorKind::Credential,
        notice: err.notice()
    }));
}

#[tokio::test]
async fn test_deleted_key_is_not_reused() {
    let transport = ScriptedTransport::new();
    transport.on(
        "GET /api-keys",
        Reply::Json(json!([
            key_json("k1", "openai", "gpt-4", true),
            key_json("k2", "openai", "gpt-3.5-turbo", true)
        ])),
    );
    transport.on(
        "GET /api-keys",
        Reply::Json(json!([key_json("k2", "openai", "gpt-3.5-turbo", true)])),
    );
    transport.on(
        "DELETE /api-keys/k1",
        Reply::Json(json!({"message": "API key deleted successfully"})),
    );
    for thread in ["t1", "t2"] {
        transport.on(
            "POST /chat",
            Reply::Json(json!({"content": "ok", "done": true, "thread_id": thread})),
        );
        transport.on(
            &format!("GET /threads/{}/messages", thread),
            Reply::Json(json!([])),
        );
    }

    let (session, _rx) = session(transport.clone());
    session.set_compose("hi");
    session.send().await.unwrap();

    session.delete_key("k1").await.unwrap();
    assert!(session.key_cache().cached_provider().is_none());

    session.start_new_thread();
    session.set_compose("hi again");
    session.send().await.unwrap();

    let chats = transport.requests_to("POST /chat");
    assert_eq!(json_body(&chats[0])["api_key_id"], "k1");
    assert_eq!(json_body(&chats[1])["api_key_id"], "k2");
}

#[tokio::test]
async fn test_first_send_takes_thread_from_final_delta_payload() {
    let transport = ScriptedTransport::new();
    with_openai_key(&transport);
    transport.on(
        "POST /chat",
        Reply::Stream(vec![sse(&[
            content("Hel"),
            json!({"content": "lo", "done": true, "thread_id": "t9"}),
        ])]),
    );
    transport.on("GET /threads/t9/messages", Reply::Json(first_exchange()));

    let (session, _rx) = session(transport.clone());
    session.set_compose("hi");
    let outcome = session.send().await.unwrap();

    assert_eq!(outcome.content, "Hello");
    assert_eq!(session.active_thread().as_deref(), Some("t9"));
    assert_eq!(session.messages().len(), 2);
}

#[tokio::test]
async fn test_attachment_only_message_is_sent_as_form() {
    let transport = ScriptedTransport::new();
    with_openai_key(&transport);
    transport.on(
        "POST /chat",
        Reply::Json(json!({"content": "Nice picture", "done": true, "thread_id": "t1"})),
    );
    transport.on("GET /threads/t1/messages", Reply::Json(json!([])));

    let (session, _rx) = session(transport.clone());
    session.attach(Some(Attachment::new(
        "cat.png",
        "image/png",
        Bytes::from_static(&[0x89, b'P', b'N', b'G']),
    )));
    session.send().await.unwrap();

    let chat = transport.requests_to("POST /chat");
    match &chat[0].body {
        byok_core::http::RequestBody::Form(form) => {
            assert_eq!(form.files.len(), 1);
            assert_eq!(form.files[0].0, "file");
            assert!(form
                .fields
                .iter()
                .any(|(name, value)| name == "api_key_id" && value == "k1"));
        }
        other => panic!("expected a form body, got {:?}", other),
    }
    assert!(session.conversation().compose.attachment.is_none());
}
