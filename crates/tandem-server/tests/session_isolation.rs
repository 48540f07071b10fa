//! Concurrent sessions never share state.

mod common;

use common::{mock_state, start_server, MockLlm, MockStt, MockTts, TestClient};
use serde_json::json;

#[tokio::test]
async fn concurrent_sessions_keep_independent_state() {
    let llm = MockLlm::new(&["Noted, let's plan it out."]);
    let state = mock_state(MockStt::silent(), llm, MockTts::new());
    let addr = start_server(state).await;

    let mut kitchen_client = TestClient::connect(addr).await;
    let mut bathroom_client = TestClient::connect(addr).await;
    kitchen_client.drain_greeting().await;
    bathroom_client.drain_greeting().await;

    kitchen_client
        .send(json!({
            "type": "text_input",
            "text": "I want to remodel my kitchen, budget is $25k"
        }))
        .await;
    bathroom_client
        .send(json!({
            "type": "text_input",
            "text": "I want to redo my bathroom, budget is $10k"
        }))
        .await;

    let kitchen_events = kitchen_client
        .collect_until(|e| e["type"] == "state_update")
        .await;
    let bathroom_events = bathroom_client
        .collect_until(|e| e["type"] == "state_update")
        .await;

    let kitchen = &kitchen_events.last().unwrap()["state"]["project"];
    assert_eq!(kitchen["room"], "kitchen");
    assert_eq!(kitchen["budget"], "$25k");

    let bathroom = &bathroom_events.last().unwrap()["state"]["project"];
    assert_eq!(bathroom["room"], "bathroom");
    assert_eq!(bathroom["budget"], "$10k");
}

#[tokio::test]
async fn a_transfer_in_one_session_does_not_move_the_other() {
    let llm = MockLlm::new(&["Okay."]);
    let state = mock_state(MockStt::silent(), llm.clone(), MockTts::new());
    let addr = start_server(state).await;

    let mut transferring = TestClient::connect(addr).await;
    let mut staying = TestClient::connect(addr).await;
    transferring.drain_greeting().await;
    staying.drain_greeting().await;

    transferring
        .send(json!({"type": "text_input", "text": "talk to alice"}))
        .await;
    let events = transferring
        .collect_until(|e| e["type"] == "state_update")
        .await;
    assert!(events.iter().any(|e| e["type"] == "agent_change"));

    // The sibling session is still with Bob: asking for Bob is a no-op.
    staying
        .send(json!({"type": "text_input", "text": "can i talk to bob"}))
        .await;
    let events = staying.collect_until(|e| e["type"] == "state_update").await;
    assert!(
        events.iter().all(|e| e["type"] != "agent_change"),
        "transfer leaked across sessions"
    );
}
