use std::sync::Mutex;
use std::time::Duration;

use albumlist_worker::errors::AlbumlistWorkerError;
use albumlist_worker::tasks::{Consume, RestoreFromCsv};
use albumlist_worker::{
    Broker, BrokerError, DelayedResultExt, IntoTaskHandlerResult, Published, TaskHandler,
    TaskOutcome, WorkerBuildError, WorkerContext, WorkerOptions, WorkerRuntimeError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::helpers::{FakeChat, FakeScraper, TestWorld, QUEUE};

mod helpers;

static FLAKY_RUNS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

#[derive(Serialize, Deserialize)]
struct Flaky {
    n: u32,
}

impl TaskHandler<WorkerContext> for Flaky {
    const IDENTIFIER: &'static str = "flaky";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        FLAKY_RUNS.lock().unwrap().push(self.n);
        if self.n == 2 {
            return Err(format!("job {} failed", self.n));
        }
        Ok(Published(self.n))
    }
}

static PANICKY_RUNS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

#[derive(Serialize, Deserialize)]
struct Panicky {
    n: u32,
}

impl TaskHandler<WorkerContext> for Panicky {
    const IDENTIFIER: &'static str = "panicky";

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        if self.n == 2 {
            panic!("job {} panicked", self.n);
        }
        PANICKY_RUNS.lock().unwrap().push(self.n);
    }
}

static ECHO_RUNS: Mutex<Vec<String>> = Mutex::new(Vec::new());

#[derive(Serialize, Deserialize, Default)]
struct Echo {
    message: String,
}

impl TaskHandler<WorkerContext> for Echo {
    const IDENTIFIER: &'static str = "echo";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        ECHO_RUNS.lock().unwrap().push(self.message.clone());
        Ok::<_, String>(Published(self.message))
    }
}

fn world() -> TestWorld {
    TestWorld::new(FakeScraper::default(), FakeChat::default())
}

#[tokio::test]
async fn envelope_round_trips_through_broker() {
    let world = world();
    let worker = world.worker().await;

    let handle = worker
        .create_producer()
        .add_job(Consume::new("https://x.example/album=42"))
        .await
        .expect("Failed to add job");

    let envelope = worker
        .queue()
        .try_pop()
        .await
        .unwrap()
        .expect("envelope in queue");
    assert_eq!(envelope.task_id(), "consume");
    assert_eq!(envelope.args()["source"], json!("https://x.example/album=42"));
    assert_eq!(envelope.result_key(), handle.key());
    assert!(handle.key().starts_with(&format!("{QUEUE}:result:")));
}

#[tokio::test]
async fn jobs_are_popped_in_push_order() {
    let world = world();
    let worker = world.worker().await;
    let producer = worker.create_producer();

    for n in 1..=3 {
        producer
            .add_job(Consume::new(format!("https://x.example/album={n}")))
            .await
            .unwrap();
    }

    let mut sources = Vec::new();
    while let Some(envelope) = worker.queue().try_pop().await.unwrap() {
        sources.push(envelope.args()["source"].as_str().unwrap().to_string());
    }
    assert_eq!(
        sources,
        vec![
            "https://x.example/album=1",
            "https://x.example/album=2",
            "https://x.example/album=3"
        ]
    );
}

#[tokio::test]
async fn failing_job_does_not_stop_the_others() {
    helpers::enable_logs();
    let world = world();
    let worker = world
        .options()
        .define_job::<Flaky>()
        .init()
        .await
        .expect("Failed to create worker");
    let producer = worker.create_producer();

    let mut handles = Vec::new();
    for n in 1..=3 {
        handles.push(producer.add_job(Flaky { n }).await.unwrap());
    }
    worker.run_once().await.unwrap();

    assert_eq!(*FLAKY_RUNS.lock().unwrap(), vec![1, 2, 3]);

    let store = world.results.as_ref();
    assert_eq!(
        handles[0].fetch(store).await.unwrap(),
        Some(TaskOutcome::Ok { value: json!(1) })
    );
    match handles[1].fetch(store).await.unwrap() {
        Some(TaskOutcome::Error { error }) => assert!(error.contains("job 2 failed")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        handles[2].fetch(store).await.unwrap(),
        Some(TaskOutcome::Ok { value: json!(3) })
    );
}

#[tokio::test]
async fn panicking_job_does_not_stop_the_others() {
    let world = world();
    let worker = world
        .options()
        .define_job::<Panicky>()
        .init()
        .await
        .unwrap();
    let producer = worker.create_producer();

    for n in 1..=3 {
        producer.add_job(Panicky { n }).await.unwrap();
    }
    worker.run_once().await.unwrap();

    assert_eq!(*PANICKY_RUNS.lock().unwrap(), vec![1, 3]);
    assert!(world.broker.waiting().await.is_empty());
}

#[tokio::test]
async fn malformed_entries_are_skipped() {
    let world = world();
    let worker = world
        .options()
        .define_job::<Echo>()
        .init()
        .await
        .unwrap();

    world
        .broker
        .push(QUEUE, "{not json".to_string())
        .await
        .unwrap();
    let handle = worker
        .create_producer()
        .add_job(Echo {
            message: "after garbage".into(),
        })
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    assert!(ECHO_RUNS
        .lock()
        .unwrap()
        .contains(&"after garbage".to_string()));
    assert_eq!(
        handle.fetch(world.results.as_ref()).await.unwrap(),
        Some(TaskOutcome::Ok {
            value: json!("after garbage")
        })
    );
}

#[tokio::test]
async fn invalid_arguments_are_reported() {
    let world = world();
    let worker = world
        .options()
        .define_job::<Echo>()
        .init()
        .await
        .unwrap();

    let handle = worker
        .create_producer()
        .add_raw_job("echo", json!({ "message": 42 }))
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    match handle.fetch(world.results.as_ref()).await.unwrap() {
        Some(TaskOutcome::Error { error }) => assert!(error.contains("echo")),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn published_result_expires_after_ttl() {
    let world = world();
    let worker = world
        .options()
        .result_ttl(Duration::from_secs(1))
        .define_job::<Echo>()
        .init()
        .await
        .unwrap();

    let handle = worker
        .create_producer()
        .add_job(Echo {
            message: "short lived".into(),
        })
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    let store = world.results.as_ref();
    assert!(handle.fetch(store).await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(handle.fetch(store).await.unwrap(), None);
}

#[tokio::test]
async fn unregistered_task_is_rejected_without_push() {
    let world = world();
    let worker = world.worker().await;
    let producer = worker.create_producer();

    let err = producer
        .add_raw_job("not-a-task", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, AlbumlistWorkerError::UnknownTask(ref id) if id == "not-a-task"));

    let err = producer.add_job(Echo::default()).await.unwrap_err();
    assert!(matches!(err, AlbumlistWorkerError::UnknownTask(ref id) if id == "echo"));

    assert!(world.broker.pushed().is_empty());
    assert_eq!(worker.queue().len().await.unwrap(), 0);
}

#[tokio::test]
async fn run_stops_on_shutdown_request() {
    let world = world();
    let worker = world
        .options()
        .concurrency(2)
        .define_job::<Echo>()
        .init()
        .await
        .unwrap();

    let producer = worker.create_producer();
    for message in ["first", "second", "third"] {
        producer
            .add_job(Echo {
                message: format!("shutdown-{message}"),
            })
            .await
            .unwrap();
    }

    let stop = async {
        while !world.broker.waiting().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.request_shutdown();
    };

    let (result, _) = tokio::join!(worker.run(), stop);
    assert!(result.is_ok());

    let runs = ECHO_RUNS.lock().unwrap();
    for message in ["first", "second", "third"] {
        assert!(runs.contains(&format!("shutdown-{message}")));
    }
}

static TICKS: Mutex<usize> = Mutex::new(0);

#[derive(Serialize, Deserialize, Default)]
struct Tick;

impl TaskHandler<WorkerContext> for Tick {
    const IDENTIFIER: &'static str = "tick";

    async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        *TICKS.lock().unwrap() += 1;
    }
}

#[tokio::test(start_paused = true)]
async fn sweeps_are_pushed_on_their_interval() {
    let world = world();
    let worker = world
        .options()
        .define_job::<Tick>()
        .sweep(Tick, Duration::from_secs(60))
        .unwrap()
        .init()
        .await
        .unwrap();

    let stop = async {
        tokio::time::sleep(Duration::from_secs(150)).await;
        worker.request_shutdown();
    };
    let (result, _) = tokio::join!(worker.run(), stop);
    assert!(result.is_ok());

    assert_eq!(world.broker.count("tick"), 2);
    assert_eq!(*TICKS.lock().unwrap(), 2);
}

#[tokio::test]
async fn init_rejects_incomplete_options() {
    let world = world();

    let result = WorkerOptions::default()
        .services(world.services())
        .init()
        .await;
    assert!(matches!(result, Err(WorkerBuildError::MissingBroker)));

    let result = WorkerOptions::default()
        .broker(world.broker.clone())
        .init()
        .await;
    assert!(matches!(result, Err(WorkerBuildError::MissingServices)));

    let result = WorkerOptions::default()
        .broker(world.broker.clone())
        .services(world.services())
        .sweep(Tick, Duration::from_secs(60))
        .unwrap()
        .init()
        .await;
    assert!(matches!(result, Err(WorkerBuildError::UnknownSweepTask(ref id)) if id == "tick"));
}

#[tokio::test]
async fn run_returns_broker_error_when_broker_goes_away() {
    let world = world();
    let worker = world.worker().await;

    let close = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        world.broker.close();
    };
    let (result, _) = tokio::join!(worker.run(), close);

    assert!(matches!(
        result,
        Err(WorkerRuntimeError::Broker(BrokerError::Closed))
    ));
}

#[tokio::test(start_paused = true)]
async fn hanging_collaborator_call_times_out() {
    let url = "https://backup.example/slow.csv";
    let world = TestWorld::new(
        FakeScraper::default().with_hanging_url(url),
        FakeChat::default(),
    );
    let worker = world
        .options()
        .call_timeout(Duration::from_secs(5))
        .init()
        .await
        .unwrap();

    let handle = worker
        .create_producer()
        .add_job(RestoreFromCsv { url: url.into() })
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    match handle.fetch(world.results.as_ref()).await.unwrap() {
        Some(TaskOutcome::Error { error }) => {
            assert!(error.contains("did not finish within 5s"), "{error}")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}
