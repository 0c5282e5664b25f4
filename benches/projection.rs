use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use simsync::cache::fingerprint_value;
use simsync::{AttachmentCache, AttachmentLocation, LogNode, LogProjector, WorldLog};

/// `steps` steps, each with a model call, a tool call and an observation.
fn make_forest(steps: usize) -> Vec<WorldLog> {
    let mut forest = Vec::with_capacity(steps * 4);
    let mut ts = 0.0;
    for i in 0..steps {
        let mut push = |id: String, node: LogNode| {
            ts += 0.01;
            forest.push(WorldLog::new(id, ts, node));
        };
        push(format!("step-{i}"), LogNode::Step { iteration: Some(i as u64) });
        push(
            format!("in-{i}"),
            LogNode::LlmInput {
                content: json!([{"role": "user", "content": "continue"}]),
            },
        );
        push(
            format!("call-{i}"),
            LogNode::ToolCall {
                tool_name: "Shop__search".to_string(),
                tool_arguments: json!({"query": "milk", "page": i}),
            },
        );
        push(
            format!("obs-{i}"),
            LogNode::Observation {
                content: "3 results".to_string(),
                attachments: Vec::new(),
            },
        );
    }
    forest
}

fn bench_projection(c: &mut Criterion) {
    let forest = make_forest(250);
    let projector = LogProjector::new(
        Arc::new(AttachmentCache::new()),
        AttachmentLocation::new(std::env::temp_dir().join("simsync-bench"), "/attachments"),
    );

    let mut group = c.benchmark_group("projection");
    group.throughput(Throughput::Elements(forest.len() as u64));
    group.bench_function("project_1000_nodes", |b| b.iter(|| projector.project(&forest)));
    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let events: Vec<serde_json::Value> = (0..1000)
        .map(|i| json!({"event_id": format!("e{i}"), "time": i, "app": "shop", "args": {"b": 2, "a": 1}}))
        .collect();
    let value = serde_json::Value::Array(events);

    let mut group = c.benchmark_group("fingerprint");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("event_log_1000", |b| b.iter(|| fingerprint_value(&value)));
    group.finish();
}

criterion_group!(benches, bench_projection, bench_fingerprint);
criterion_main!(benches);
