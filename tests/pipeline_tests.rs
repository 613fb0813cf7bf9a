use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Barrier, Notify};

use conveyor::{Config, Generator, Pipeline, PipelineError, Stage};

/// Yields 1 through 10, then end-of-stream.
#[derive(Default)]
struct CountsToTen {
    next_count: AtomicUsize,
}

#[async_trait]
impl Generator<u32> for CountsToTen {
    fn name(&self) -> &str {
        "counts-to-ten"
    }

    async fn next(&self) -> Option<u32> {
        let n = self.next_count.fetch_add(1, Ordering::SeqCst) + 1;
        (n <= 10).then_some(n as u32)
    }

    fn abort(&self) {}
}

/// Yields one job, then blocks until aborted.
struct Abortable {
    next_count: AtomicUsize,
    abort_count: AtomicUsize,
    quit: Notify,
}

impl Abortable {
    fn new() -> Self {
        Self {
            next_count: AtomicUsize::new(0),
            abort_count: AtomicUsize::new(0),
            quit: Notify::new(),
        }
    }
}

#[async_trait]
impl Generator<u32> for Abortable {
    fn name(&self) -> &str {
        "abortable"
    }

    async fn next(&self) -> Option<u32> {
        let n = self.next_count.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 {
            return Some(1);
        }

        self.quit.notified().await;
        None
    }

    fn abort(&self) {
        self.abort_count.fetch_add(1, Ordering::SeqCst);
        // notify_one stores a permit, so an abort that lands before the
        // feeder's second `next` call is not lost.
        self.quit.notify_one();
    }
}

struct CountingStage {
    concurrency: usize,
    process_count: AtomicUsize,
}

impl CountingStage {
    fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            process_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Stage<u32> for CountingStage {
    fn name(&self) -> &str {
        "counting"
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn process(&self, _job: &mut u32) {
        self.process_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Every `process` call blocks until all ten workers are inside `process` at
/// once, proving the pool really runs that many workers in parallel.
struct RendezvousStage {
    rendezvous: Barrier,
    process_count: AtomicUsize,
}

impl RendezvousStage {
    fn new(workers: usize) -> Self {
        Self {
            rendezvous: Barrier::new(workers),
            process_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Stage<u32> for RendezvousStage {
    fn name(&self) -> &str {
        "rendezvous"
    }

    fn concurrency(&self) -> usize {
        10
    }

    async fn process(&self, _job: &mut u32) {
        self.rendezvous.wait().await;
        self.process_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every job it sees, in arrival order.
#[derive(Default)]
struct CollectingStage {
    seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl Stage<u32> for CollectingStage {
    fn name(&self) -> &str {
        "collecting"
    }

    fn concurrency(&self) -> usize {
        1
    }

    async fn process(&self, job: &mut u32) {
        self.seen.lock().unwrap().push(*job);
    }
}

struct PanickingStage;

#[async_trait]
impl Stage<u32> for PanickingStage {
    fn name(&self) -> &str {
        "panicking"
    }

    fn concurrency(&self) -> usize {
        1
    }

    async fn process(&self, _job: &mut u32) {
        panic!("stage blew up");
    }
}

#[tokio::test]
async fn ten_jobs_through_two_stages() {
    let generator = Arc::new(CountsToTen::default());
    let serial = Arc::new(CountingStage::new(1));
    let fanned_out = Arc::new(CountingStage::new(10));

    let mut pipeline = Pipeline::<u32>::new();
    pipeline.set_generator(generator.clone());
    pipeline.add_stages([
        serial.clone() as Arc<dyn Stage<u32>>,
        fanned_out.clone() as Arc<dyn Stage<u32>>,
    ]);

    assert_eq!(pipeline.run().await, Ok(()));

    // 10 jobs plus the terminal end-of-stream probe.
    assert_eq!(generator.next_count.load(Ordering::SeqCst), 11);
    assert_eq!(serial.process_count.load(Ordering::SeqCst), 10);
    assert_eq!(fanned_out.process_count.load(Ordering::SeqCst), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_runs_workers_in_parallel() {
    let generator = Arc::new(CountsToTen::default());
    let stage = Arc::new(RendezvousStage::new(10));

    let mut pipeline = Pipeline::<u32>::new();
    pipeline.set_generator(generator.clone());
    pipeline.add_stage(stage.clone());

    // Completes only if all ten workers are simultaneously inside `process`;
    // a serialized pool would deadlock on the rendezvous.
    assert_eq!(pipeline.run().await, Ok(()));
    assert_eq!(stage.process_count.load(Ordering::SeqCst), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_while_running() {
    let generator = Arc::new(Abortable::new());
    let stage = Arc::new(CountingStage::new(1));

    let mut pipeline = Pipeline::<u32>::new();
    pipeline.set_generator(generator.clone());
    pipeline.add_stage(stage.clone());

    let pipeline = Arc::new(pipeline);
    let aborter = pipeline.clone();
    let abort = tokio::spawn(async move { aborter.abort() });

    assert_eq!(pipeline.run().await, Ok(()));
    assert_eq!(abort.await.unwrap(), Ok(()));

    // The job admitted before the abort still drained through the stage;
    // nothing was admitted after it.
    assert_eq!(generator.next_count.load(Ordering::SeqCst), 2);
    assert_eq!(generator.abort_count.load(Ordering::SeqCst), 1);
    assert_eq!(stage.process_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_worker_stages_preserve_order() {
    let generator = Arc::new(CountsToTen::default());
    let first = Arc::new(CountingStage::new(1));
    let collector = Arc::new(CollectingStage::default());

    let mut pipeline = Pipeline::<u32>::new();
    pipeline.set_generator(generator);
    pipeline.add_stages([
        first as Arc<dyn Stage<u32>>,
        collector.clone() as Arc<dyn Stage<u32>>,
    ]);

    assert_eq!(pipeline.run().await, Ok(()));

    let seen = collector.seen.lock().unwrap();
    assert_eq!(*seen, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test]
async fn no_concurrency_forces_single_workers() {
    let generator = Arc::new(CountsToTen::default());
    let stage = Arc::new(CountingStage::new(10));
    let collector = Arc::new(CollectingStage::default());

    let mut pipeline = Pipeline::<u32>::with_config(Config {
        no_concurrency: true,
        ..Config::default()
    });
    pipeline.set_generator(generator.clone());
    pipeline.add_stages([
        stage.clone() as Arc<dyn Stage<u32>>,
        collector.clone() as Arc<dyn Stage<u32>>,
    ]);

    assert_eq!(pipeline.run().await, Ok(()));

    assert_eq!(generator.next_count.load(Ordering::SeqCst), 11);
    assert_eq!(stage.process_count.load(Ordering::SeqCst), 10);

    // With every pool forced to one worker, end-to-end order holds even for
    // a stage that declared concurrency 10.
    let seen = collector.seen.lock().unwrap();
    assert_eq!(*seen, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test]
async fn unbuffered_pipeline_completes() {
    let generator = Arc::new(CountsToTen::default());
    let stage = Arc::new(CountingStage::new(4));

    let mut pipeline = Pipeline::<u32>::with_config(Config {
        buffered: false,
        ..Config::default()
    });
    pipeline.set_generator(generator.clone());
    pipeline.add_stage(stage.clone());

    assert_eq!(pipeline.run().await, Ok(()));

    assert_eq!(generator.next_count.load(Ordering::SeqCst), 11);
    assert_eq!(stage.process_count.load(Ordering::SeqCst), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_clean_across_pool_sizes() {
    // Each run must close every queue exactly once and terminate the drain,
    // whatever the mix of pool sizes along the chain.
    for concurrencies in [vec![1], vec![5], vec![1, 10, 3], vec![8, 8]] {
        let generator = Arc::new(CountsToTen::default());
        let stages: Vec<Arc<CountingStage>> = concurrencies
            .iter()
            .map(|&k| Arc::new(CountingStage::new(k)))
            .collect();

        let mut pipeline = Pipeline::<u32>::new();
        pipeline.set_generator(generator);
        pipeline.add_stages(
            stages
                .iter()
                .map(|s| s.clone() as Arc<dyn Stage<u32>>),
        );

        assert_eq!(pipeline.run().await, Ok(()));

        for stage in &stages {
            assert_eq!(stage.process_count.load(Ordering::SeqCst), 10);
        }
    }
}

#[tokio::test]
#[should_panic(expected = "stage blew up")]
async fn stage_panic_propagates_to_run_caller() {
    let mut pipeline = Pipeline::<u32>::new();
    pipeline.set_generator(Arc::new(CountsToTen::default()));
    pipeline.add_stage(Arc::new(PanickingStage));

    let _ = pipeline.run().await;
}

#[tokio::test]
async fn abort_without_generator_fails() {
    let pipeline = Pipeline::<u32>::new();

    assert_eq!(pipeline.abort(), Err(PipelineError::NoGenerator));
}
