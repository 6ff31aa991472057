use actiongate::{Dispatcher, InMemoryDatastore, Settings};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build() -> Dispatcher {
    Dispatcher::new(
        &Settings::default().dispatcher,
        Arc::new(InMemoryDatastore::new()),
    )
}

fn dispatch_ping_anonymous(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let dispatcher = build();

    c.bench_function("dispatch_ping_anonymous", |b| {
        b.iter(|| {
            let response = runtime.block_on(dispatcher.request(
                dispatcher.ping_action(),
                Value::Null,
                None,
            ));
            black_box(response)
        })
    });
}

fn dispatch_ping_pong_session(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let dispatcher = build();
    let session = runtime
        .block_on(dispatcher.request(dispatcher.create_session_action(), Value::Null, None))
        .data
        .session_id()
        .cloned()
        .unwrap();

    c.bench_function("dispatch_ping_pong_session", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let ping = dispatcher
                    .request(dispatcher.ping_action(), Value::Null, Some(&session))
                    .await;
                let pong = &ping.actions[0].action_id;
                black_box(dispatcher.request(pong, Value::Null, Some(&session)).await)
            })
        })
    });
}

criterion_group!(benches, dispatch_ping_anonymous, dispatch_ping_pong_session);
criterion_main!(benches);
