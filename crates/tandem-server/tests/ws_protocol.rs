//! WebSocket envelope behavior: keepalive, unknown frames, silent audio,
//! and the connect-time greeting.

mod common;

use base64::Engine;
use common::{mock_state, start_server, MockLlm, MockStt, MockTts, TestClient};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn greeting_plays_on_connect() {
    let tts = MockTts::new();
    let state = mock_state(MockStt::silent(), MockLlm::new(&["Hi."]), tts.clone());
    let addr = start_server(state).await;

    let mut client = TestClient::connect(addr).await;
    let first = client.next_event().await;
    assert_eq!(first["type"], "connected");
    assert_eq!(first["agent"], "bob");

    let events = client
        .collect_until(|e| e["type"] == "tts_done" && e["turn_id"] == 0)
        .await;
    assert!(events
        .iter()
        .any(|e| e["type"] == "llm_token" && e["token"].as_str().unwrap().contains("Bob")));
    assert!(events.iter().any(|e| e["type"] == "tts_chunk"));

    // The greeting was synthesized in Bob's voice.
    let calls = tts.recorded_calls();
    assert_eq!(calls[0].0, "alloy");
}

#[tokio::test]
async fn ping_gets_pong_and_unknown_types_are_ignored() {
    let state = mock_state(MockStt::silent(), MockLlm::new(&["Hi."]), MockTts::new());
    let addr = start_server(state).await;

    let mut client = TestClient::connect(addr).await;
    client.drain_greeting().await;

    client.send(json!({"type": "bogus_frame", "x": 1})).await;
    client.send(json!({"type": "ping"})).await;

    let event = client.next_event().await;
    assert_eq!(event["type"], "pong", "unknown frame broke the session");
}

#[tokio::test]
async fn silent_audio_ends_quietly() {
    let state = mock_state(MockStt::silent(), MockLlm::new(&["Hi."]), MockTts::new());
    let addr = start_server(state).await;

    let mut client = TestClient::connect(addr).await;
    client.drain_greeting().await;

    // Half a second of dead-silent PCM: enough bytes to reach STT, below
    // the energy gate.
    let silence = vec![0u8; 16_000];
    let data = base64::engine::general_purpose::STANDARD.encode(&silence);
    client
        .send(json!({"type": "audio_chunk", "data": data, "turn_id": 1}))
        .await;
    client.send(json!({"type": "end_of_audio", "turn_id": 1})).await;

    let events = client.collect_for(Duration::from_millis(500)).await;
    // At most the processing notice; never a transcript or state change.
    for event in &events {
        assert_eq!(event["type"], "stt_processing", "unexpected: {event}");
    }
}

#[tokio::test]
async fn sub_threshold_audio_is_dropped_without_events() {
    let state = mock_state(MockStt::silent(), MockLlm::new(&["Hi."]), MockTts::new());
    let addr = start_server(state).await;

    let mut client = TestClient::connect(addr).await;
    client.drain_greeting().await;

    // 100 ms worth of bytes: below the minimum utterance bound.
    let blip = vec![0u8; 3_200];
    let data = base64::engine::general_purpose::STANDARD.encode(&blip);
    client
        .send(json!({"type": "audio_chunk", "data": data}))
        .await;
    client.send(json!({"type": "end_of_audio"})).await;

    let events = client.collect_for(Duration::from_millis(400)).await;
    assert!(events.is_empty(), "expected silence, got {events:#?}");
}

#[tokio::test]
async fn transcribed_audio_runs_a_full_turn() {
    let stt = MockStt::returning("I want to redo my basement");
    let llm = MockLlm::new(&["Basements are a great project."]);
    let state = mock_state(stt, llm, MockTts::new());
    let addr = start_server(state).await;

    let mut client = TestClient::connect(addr).await;
    client.drain_greeting().await;

    // Loud square-wave PCM so the silence gate passes.
    let mut pcm = Vec::new();
    for i in 0..8_000u32 {
        let sample: i16 = if i % 2 == 0 { 8_000 } else { -8_000 };
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    let data = base64::engine::general_purpose::STANDARD.encode(&pcm);
    client
        .send(json!({"type": "audio_chunk", "data": data}))
        .await;
    client.send(json!({"type": "end_of_audio"})).await;

    let events = client.collect_until(|e| e["type"] == "state_update").await;
    let types = common::types_for_turn(&events, 1);
    assert_eq!(types.first().map(String::as_str), Some("stt_processing"));
    let transcript = events
        .iter()
        .find(|e| e["type"] == "final_transcript")
        .unwrap();
    assert_eq!(transcript["text"], "I want to redo my basement");
    assert!(transcript["latency_ms"].is_u64());
    assert_eq!(events.last().unwrap()["state"]["project"]["room"], "basement");
}

#[tokio::test]
async fn unparseable_envelope_closes_the_session() {
    let state = mock_state(MockStt::silent(), MockLlm::new(&["Hi."]), MockTts::new());
    let addr = start_server(state).await;

    let mut client = TestClient::connect(addr).await;
    client.drain_greeting().await;

    client.send_raw("this is not json").await;
    assert!(
        client.closed_within(Duration::from_secs(2)).await,
        "session should close on an unparseable envelope"
    );
}

#[tokio::test]
async fn webrtc_offer_and_ice_are_accepted() {
    let state = mock_state(MockStt::silent(), MockLlm::new(&["Hi."]), MockTts::new());
    let addr = start_server(state).await;

    let mut client = TestClient::connect(addr).await;
    client.drain_greeting().await;

    client
        .send(json!({"type": "webrtc_offer", "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1"}))
        .await;
    client
        .send(json!({"type": "ice_candidate", "candidate": {"candidate": "candidate:1"}}))
        .await;

    // The relay records them; the session stays healthy.
    client.send(json!({"type": "ping"})).await;
    let event = client.next_event().await;
    assert_eq!(event["type"], "pong");
}
