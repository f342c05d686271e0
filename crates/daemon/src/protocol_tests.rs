// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn method_names_are_snake_case() {
    assert_eq!(
        serde_json::to_string(&Method::ServiceStates).unwrap(),
        "\"service_states\""
    );
    assert_eq!(serde_json::to_string(&Method::Kill).unwrap(), "\"kill\"");
}

#[test]
fn event_names_are_kebab_case() {
    let restart = ChildMessage::Event(EventMessage::Restart);
    let json = serde_json::to_string(&restart).unwrap();
    assert!(json.contains("\"restart\""), "{json}");

    let change = ChildMessage::Event(EventMessage::StateChange {
        states: IndexMap::new(),
    });
    let json = serde_json::to_string(&change).unwrap();
    assert!(json.contains("\"state-change\""), "{json}");
}

#[test]
fn state_snapshots_keep_insertion_order() {
    let mut states = IndexMap::new();
    states.insert("web:api".to_string(), State::Running);
    states.insert("tick".to_string(), State::Paused);
    let json = serde_json::to_string(&states).unwrap();

    assert_eq!(json, r#"{"web:api":"running","tick":"paused"}"#);
}

#[tokio::test]
async fn replies_and_events_are_distinguishable() {
    let (mut client, mut server) = tokio::io::duplex(1024);

    let reply = ChildMessage::Reply(Reply {
        id: 7,
        result: Ok(ReplyValue::Unit),
    });
    let event = ChildMessage::Event(EventMessage::Restart);
    wire::write_frame(&mut client, &reply).await.unwrap();
    wire::write_frame(&mut client, &event).await.unwrap();

    let first: ChildMessage = wire::read_frame(&mut server).await.unwrap();
    assert_eq!(first, reply);
    let second: ChildMessage = wire::read_frame(&mut server).await.unwrap();
    assert_eq!(second, event);
}

#[test]
fn remote_error_carries_the_context_chain() {
    let err = anyhow::anyhow!("root cause")
        .context("middle layer")
        .context("outer description");
    let remote = RemoteError::from_error(&err);

    assert_eq!(remote.message, "outer description");
    assert_eq!(remote.chain, vec!["middle layer", "root cause"]);
    assert!(remote.detail.contains("root cause"));
}

#[tokio::test]
async fn calls_survive_the_wire() {
    let (mut client, mut server) = tokio::io::duplex(1024);

    let call = Call {
        id: 42,
        method: Method::Pause,
    };
    wire::write_frame(&mut client, &call).await.unwrap();

    let parsed: Call = wire::read_frame(&mut server).await.unwrap();
    assert_eq!(parsed, call);
}

#[tokio::test]
async fn closed_pipe_reports_connection_closed() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);

    let err = wire::read_frame::<_, Call>(&mut server).await.unwrap_err();
    assert!(matches!(err, wire::ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected() {
    let (mut client, mut server) = tokio::io::duplex(64);
    tokio::io::AsyncWriteExt::write_all(&mut client, &u32::MAX.to_be_bytes())
        .await
        .unwrap();

    let err = wire::read_frame::<_, Call>(&mut server).await.unwrap_err();
    assert!(matches!(err, wire::ProtocolError::FrameTooLarge { .. }));
}
