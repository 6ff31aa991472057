// E2E tests for the dispatch protocol
//
// Drives the public API the way a remote caller would: every step uses only
// action ids granted by an earlier response.

use actiongate::{
    build_dispatcher, ActionFlags, ActionId, ActionInvocation, ActionService, Dispatcher,
    HandlerId, InMemoryDatastore, ResponseData, ServiceRequest, ServiceResponse, SessionId,
    Settings,
};
use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

async fn create_session(dispatcher: &Dispatcher) -> SessionId {
    let response = dispatcher
        .request(dispatcher.create_session_action(), Value::Null, None)
        .await;
    assert!(response.success);
    response.data.session_id().cloned().unwrap()
}

#[tokio::test]
async fn e2e_wire_request_round_trip() {
    let (dispatcher, _) = build_dispatcher(&Settings::default(), None).unwrap();

    let request: ServiceRequest = serde_json::from_value(json!({
        "actionID": dispatcher.create_session_action().as_str(),
    }))
    .unwrap();
    let created = serde_json::to_value(dispatcher.post(request).await).unwrap();
    assert_eq!(created["success"], true);
    let session = created["data"]["sessionID"].as_str().unwrap().to_string();
    assert!(session.starts_with("TKN:"));

    let ping: ServiceRequest = serde_json::from_value(json!({
        "sessionID": session,
        "actionID": dispatcher.ping_action().as_str(),
        "actionParams": null,
    }))
    .unwrap();
    let ping = serde_json::to_value(dispatcher.post(ping).await).unwrap();
    assert_eq!(ping["data"], json!({"validLogin": true}));
    let pong_id = ping["actions"][0]["actionID"].as_str().unwrap();
    assert!(pong_id.starts_with("ACT:"));

    let pong: ServiceRequest = serde_json::from_value(json!({
        "sessionID": session,
        "actionID": pong_id,
    }))
    .unwrap();
    let pong = serde_json::to_value(dispatcher.post(pong).await).unwrap();
    assert_eq!(
        pong,
        json!({"success": true, "actions": [], "data": {"validLogin": true}})
    );
}

#[tokio::test]
async fn e2e_custom_prefixes_apply_to_minted_ids() {
    let mut settings = Settings::default();
    settings.dispatcher.action_prefix = "CAP".into();
    settings.dispatcher.session_prefix = "SES".into();
    let (dispatcher, _) = build_dispatcher(&settings, None).unwrap();
    assert!(dispatcher.ping_action().as_str().starts_with("CAP:"));
    let session = create_session(&dispatcher).await;
    assert!(session.as_str().starts_with("SES:"));
}

/// Counts down, granting the next step until zero.
struct Countdown;

#[async_trait]
impl ActionService for Countdown {
    fn id(&self) -> HandlerId {
        HandlerId::new("countdown").unwrap()
    }

    async fn handle_event(
        &self,
        dispatcher: &Dispatcher,
        invocation: ActionInvocation,
    ) -> ServiceResponse {
        let remaining = invocation.config["remaining"].as_u64().unwrap_or(0);
        let actions = if remaining > 0 {
            vec![dispatcher.create_service_action(
                self.id(),
                json!({"remaining": remaining - 1}),
                ActionFlags::single_use(),
            )]
        } else {
            Vec::new()
        };
        ServiceResponse::payload(
            json!({"remaining": remaining, "session": invocation.session_id}),
            actions,
        )
    }
}

#[tokio::test]
async fn e2e_handler_chain_follows_granted_actions() {
    let (dispatcher, _) = build_dispatcher(&Settings::default(), None).unwrap();
    let handler = dispatcher.register_action_service(Arc::new(Countdown)).unwrap();
    let session = create_session(&dispatcher).await;

    let mut next = dispatcher
        .create_service_action(handler, json!({"remaining": 3}), ActionFlags::single_use())
        .action_id;
    let mut seen = Vec::new();
    loop {
        let response = dispatcher.request(&next, Value::Null, Some(&session)).await;
        assert!(response.success);
        let ResponseData::Payload(payload) = &response.data else {
            panic!("expected payload");
        };
        assert_eq!(payload["session"], session.as_str());
        seen.push(payload["remaining"].as_u64().unwrap());
        let replay = dispatcher.request(&next, Value::Null, Some(&session)).await;
        assert_eq!(replay.data.message(), Some("Bad Request"));
        match response.action_ids().next() {
            Some(id) => next = id.clone(),
            None => break,
        };
    }
    assert_eq!(seen, vec![3, 2, 1, 0]);
}

#[tokio::test]
async fn e2e_concurrent_redemption_has_one_winner() {
    let dispatcher = Arc::new(Dispatcher::new(
        &Settings::default().dispatcher,
        Arc::new(InMemoryDatastore::new()),
    ));
    let session = create_session(&dispatcher).await;
    let ping = dispatcher
        .request(dispatcher.ping_action(), Value::Null, Some(&session))
        .await;
    let pong: ActionId = ping.actions[0].action_id.clone();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let dispatcher = dispatcher.clone();
        let pong = pong.clone();
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher
                .request(&pong, Value::Null, Some(&session))
                .await
                .success
        }));
    }
    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

proptest! {
    #[test]
    fn single_use_actions_redeem_exactly_once(attempts in 1usize..8, validated in any::<bool>()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let dispatcher = Dispatcher::new(
                &Settings::default().dispatcher,
                Arc::new(InMemoryDatastore::new()),
            );
            let session = if validated {
                Some(create_session(&dispatcher).await)
            } else {
                None
            };
            let ping = dispatcher
                .request(dispatcher.ping_action(), Value::Null, session.as_ref())
                .await;
            prop_assert_eq!(ping.actions.len(), usize::from(validated));
            if let Some(action) = ping.actions.first() {
                let mut successes = 0;
                for _ in 0..attempts {
                    let response = dispatcher
                        .request(&action.action_id, Value::Null, session.as_ref())
                        .await;
                    if response.success {
                        successes += 1;
                    }
                }
                prop_assert_eq!(successes, 1);
            }
            Ok(())
        })?;
    }
}
