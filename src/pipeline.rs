use std::sync::Arc;

use tokio::select;
use tokio::sync::Barrier;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::queue::Queue;
use crate::{Generator, PipelineError, Stage};

/// Tuning knobs for a [Pipeline]. Read-only once [Pipeline::run] begins.
#[derive(Debug, Clone)]
pub struct Config {
    /// Give each stage's output queue room for `concurrency * depth` jobs
    /// instead of a synchronous single-slot handoff.
    pub buffered: bool,

    /// Per-worker buffering multiplier applied when `buffered` is set.
    pub depth: usize,

    /// Run every stage with a single worker regardless of its declared
    /// concurrency; helps with debugging.
    pub no_concurrency: bool,

    /// Emit step-level diagnostics as jobs move between stages.
    pub verbose: bool,
}

impl Default for Config {
    /// Buffered queues with a depth of 10.
    fn default() -> Self {
        Self {
            buffered: true,
            depth: 10,
            no_concurrency: false,
            verbose: false,
        }
    }
}

/// Owns the generator, the ordered stage list, and the queues linking them.
///
/// A pipeline is assembled once (attach a generator, append stages) and then
/// [run](Pipeline::run) exactly once. `run` borrows the pipeline shared, so it
/// can be wrapped in an [Arc] and aborted from another task while running;
/// the borrow checker rules out reconfiguring it mid-flight.
///
/// See the [crate] docs for a complete example.
pub struct Pipeline<J> {
    generator: Option<Arc<dyn Generator<J>>>,
    stages: Vec<Arc<dyn Stage<J>>>,
    queues: Vec<Queue<J>>,
    config: Config,
}

impl<J: Send + 'static> Default for Pipeline<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Send + 'static> Pipeline<J> {
    /// Creates an empty pipeline with the default [Config].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty pipeline with the provided configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            generator: None,
            stages: Vec::new(),
            queues: Vec::new(),
            config,
        }
    }

    /// Registers the generator and allocates the one-slot handoff queue
    /// between the feeder task and the first stage.
    ///
    /// Call this before adding stages so the queues line up with the stage
    /// order.
    ///
    /// # Panics
    ///
    /// Panics if a generator has already been set.
    pub fn set_generator(&mut self, generator: Arc<dyn Generator<J>>) {
        assert!(self.generator.is_none(), "generator already set");

        // Always buffered, independent of Config::buffered: a single slot
        // lets the feeder stay one job ahead of the first stage.
        self.queues.push(Queue::bounded(1));
        self.generator = Some(generator);
    }

    /// Appends a stage and allocates its output queue.
    ///
    /// Jobs pass through stages in the order they are added. Must be called
    /// after [set_generator](Pipeline::set_generator) and before
    /// [run](Pipeline::run).
    pub fn add_stage(&mut self, stage: Arc<dyn Stage<J>>) {
        let capacity = if self.config.buffered {
            self.effective_concurrency(stage.as_ref()) * self.config.depth
        } else {
            0
        };

        self.queues.push(Queue::bounded(capacity));
        self.stages.push(stage);
    }

    /// Appends several stages in order.
    pub fn add_stages(&mut self, stages: impl IntoIterator<Item = Arc<dyn Stage<J>>>) {
        for stage in stages {
            self.add_stage(stage);
        }
    }

    /// Pulls every job from the generator through each stage in order,
    /// returning once the pipeline has fully drained.
    ///
    /// One feeder task and one worker task per unit of stage concurrency are
    /// launched; the calling task blocks draining the terminal queue. Stages
    /// with more than one worker may reorder jobs relative to each other;
    /// only a single-worker stage preserves its input order.
    ///
    /// # Errors
    ///
    /// [PipelineError::NoGenerator] if no generator was registered, and
    /// [PipelineError::NoStages] if no stages were; both are detected before
    /// any task starts.
    ///
    /// # Panics
    ///
    /// A panic inside a stage or the generator is not contained: it is
    /// resumed on this caller. Calling `run` a second time is unsupported and
    /// panics.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let Some(generator) = self.generator.clone() else {
            error!("no generator has been set");
            return Err(PipelineError::NoGenerator);
        };
        if self.stages.is_empty() {
            error!("there are no stages defined");
            return Err(PipelineError::NoStages);
        }

        info!(
            generator = generator.name(),
            buffered = self.config.buffered,
            concurrency = !self.config.no_concurrency,
            verbose = self.config.verbose,
            "starting pipeline"
        );
        for stage in &self.stages {
            info!(
                stage = stage.name(),
                concurrency = self.effective_concurrency(stage.as_ref()),
                "configured stage"
            );
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(feed(
            generator,
            self.queues[0].clone(),
            self.config.verbose,
        ));

        for (idx, stage) in self.stages.iter().enumerate() {
            let workers = self.effective_concurrency(stage.as_ref());
            if self.config.verbose {
                debug!(stage = stage.name(), concurrency = workers, "launching");
            }

            let barrier = Arc::new(Barrier::new(workers));
            for ordinal in 0..workers {
                tasks.spawn(work(
                    stage.clone(),
                    ordinal,
                    self.queues[idx].clone(),
                    self.queues[idx + 1].clone(),
                    barrier.clone(),
                    self.config.verbose,
                ));
            }
        }

        // Jobs leaving the terminal stage have already been fully processed;
        // drain them while watching the tasks so a panicked worker surfaces
        // instead of stalling the drain forever.
        let terminal = self
            .queues
            .last()
            .expect("topology always has one more queue than stages")
            .clone();
        let drain = async move { while terminal.pop().await.is_some() {} };
        tokio::pin!(drain);

        loop {
            select! {
                _ = &mut drain => break,
                Some(result) = tasks.join_next() => check_join_result(result),
            }
        }
        while let Some(result) = tasks.join_next().await {
            check_join_result(result);
        }

        if self.config.verbose {
            debug!("pipeline drained");
        }
        Ok(())
    }

    /// Gracefully winds the pipeline down by delegating to the generator's
    /// [abort](Generator::abort).
    ///
    /// This is the only cancellation mechanism: jobs the feeder has already
    /// admitted still drain through every stage, and in-flight stage work is
    /// never interrupted.
    ///
    /// # Errors
    ///
    /// [PipelineError::NoGenerator] if no generator was registered.
    pub fn abort(&self) -> Result<(), PipelineError> {
        match &self.generator {
            Some(generator) => {
                generator.abort();
                Ok(())
            }
            None => {
                error!("no generator has been set");
                Err(PipelineError::NoGenerator)
            }
        }
    }

    fn effective_concurrency(&self, stage: &dyn Stage<J>) -> usize {
        if self.config.no_concurrency {
            1
        } else {
            stage.concurrency().max(1)
        }
    }
}

/// The single feeder task: moves jobs from the generator onto the first
/// queue, then closes it. The feeder is the queue's only producer, so no
/// coordination is needed for the close.
async fn feed<J: Send + 'static>(generator: Arc<dyn Generator<J>>, queue: Queue<J>, verbose: bool) {
    let tx = queue.sender();

    while let Some(job) = generator.next().await {
        if tx.send(job).await.is_err() {
            break;
        }
    }

    if verbose {
        debug!(generator = generator.name(), "generator exhausted, closing feed queue");
    }
    drop(tx);
    queue.close();
}

/// One worker of a stage's pool: pop, process, forward, until the input
/// queue is closed and drained.
async fn work<J: Send + 'static>(
    stage: Arc<dyn Stage<J>>,
    ordinal: usize,
    input: Queue<J>,
    output: Queue<J>,
    barrier: Arc<Barrier>,
    verbose: bool,
) {
    let tx = output.sender();
    debug!(stage = stage.name(), worker = ordinal, "ready");

    while let Some(mut job) = input.pop().await {
        if verbose {
            debug!(stage = stage.name(), worker = ordinal, "processing");
        }

        stage.process(&mut job).await;

        if tx.send(job).await.is_err() {
            break;
        }
    }

    if verbose {
        debug!(stage = stage.name(), worker = ordinal, "done");
    }

    // The output queue may only be closed once, and only after every worker
    // in the pool has stopped pushing to it. Each worker drops its sender
    // before parking at the barrier; the last one through closes the queue.
    drop(tx);
    if barrier.wait().await.is_leader() {
        if verbose {
            debug!(stage = stage.name(), worker = ordinal, "closing output queue");
        }
        output.close();
    }
}

fn check_join_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            std::panic::resume_unwind(e.into_panic());
        }
    }
}
