//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use jobflow::actions::Action;
use jobflow::broadcast::NoOpBroadcaster;
use jobflow::config::WorkerConfig;
use jobflow::coordinator::InMemoryCompletionStore;
use jobflow::core::JobState;
use jobflow::pipeline::{Pipeline, PipelineExecutor};
use jobflow::queue::{dedupe_key, EnqueueOptions, InMemoryQueue, JobQueue};
use jobflow::recipe::{recipe_worker, InMemoryNoteRepository, RecipeDeps, NOTE_JOB, NOTE_QUEUE};
use jobflow::testing::{test_action_context, StaticAction};
use serde_json::json;
use std::sync::Arc;

fn static_pipeline(len: usize) -> Pipeline<()> {
    (0..len).fold(Pipeline::new("bench"), |pipeline, i| {
        let name = format!("step-{i}");
        let output = JobState::new().with(name.clone(), i);
        pipeline.with_action(Arc::new(StaticAction::new(name).with_output(output)) as Arc<dyn Action<()>>)
    })
}

fn pipeline_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let ctx = test_action_context();
    let broadcaster = NoOpBroadcaster;

    for len in [1, 10] {
        let pipeline = static_pipeline(len);
        c.bench_function(&format!("execute_{len}_actions"), |b| {
            b.iter(|| {
                let executor = PipelineExecutor::new(&(), &ctx, &broadcaster);
                let state = rt.block_on(executor.run(&pipeline, JobState::new().with("noteId", "n1")));
                black_box(state.unwrap())
            });
        });
    }

    c.bench_function("job_state_merge", |b| {
        let base = JobState::from_value(json!({"noteId": "n1", "content": "x".repeat(256)})).unwrap();
        let output = JobState::new().with("cleanedContent", "y".repeat(256));
        b.iter(|| black_box(base.clone().merged(output.clone())));
    });

    c.bench_function("dedupe_key", |b| {
        b.iter(|| black_box(dedupe_key(&["process-ingredient-line", "note-1", "note-1-ing-0"])));
    });
}

fn recipe_flow_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let content = "<h1>Soup</h1><h2>Ingredients</h2><ul><li>1 cup stock</li><li>2 carrots</li></ul>\
                   <h2>Steps</h2><ol><li>boil</li></ol>";

    c.bench_function("recipe_note_end_to_end", |b| {
        b.iter_batched(
            || {
                let queue = Arc::new(InMemoryQueue::default());
                let deps = RecipeDeps::new(
                    Arc::new(InMemoryNoteRepository::new()),
                    queue.clone(),
                    Arc::new(InMemoryCompletionStore::new()),
                    Arc::new(NoOpBroadcaster),
                )
                .unwrap();
                let worker = recipe_worker(WorkerConfig::default(), Arc::new(deps)).unwrap();
                (queue, worker)
            },
            |(queue, worker)| {
                rt.block_on(async {
                    queue
                        .enqueue(
                            NOTE_QUEUE,
                            NOTE_JOB,
                            json!({"noteId": "n1", "content": content}),
                            EnqueueOptions::default(),
                        )
                        .await
                        .unwrap();
                    while !queue.is_drained() {
                        for name in worker.queues() {
                            while worker.poll_once(queue.as_ref(), &name).await.unwrap().is_some() {}
                        }
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, pipeline_benchmark, recipe_flow_benchmark);
criterion_main!(benches);
