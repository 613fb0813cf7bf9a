//!
//! Conveyor moves opaque jobs through an ordered series of processing stages,
//! fanning each stage out to a fixed pool of concurrent workers.
//!
//! A [Generator] yields jobs one at a time until it runs dry; the pipeline
//! hands every job to each [Stage] in registration order and returns from
//! [Pipeline::run] once the last job has left the last stage. The engine
//! never looks inside a job: what a job is, and how a stage records failures
//! on it, is entirely up to the caller.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use conveyor::{Generator, Pipeline, Stage};
//!
//! // Yields the numbers 1 through 10, then signals end-of-stream.
//! struct Numbers(AtomicUsize);
//!
//! #[async_trait]
//! impl Generator<usize> for Numbers {
//!     fn name(&self) -> &str {
//!         "numbers"
//!     }
//!
//!     async fn next(&self) -> Option<usize> {
//!         let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         (n <= 10).then_some(n)
//!     }
//!
//!     fn abort(&self) {}
//! }
//!
//! struct Sum(Arc<AtomicUsize>);
//!
//! #[async_trait]
//! impl Stage<usize> for Sum {
//!     fn name(&self) -> &str {
//!         "sum"
//!     }
//!
//!     fn concurrency(&self) -> usize {
//!         4
//!     }
//!
//!     async fn process(&self, job: &mut usize) {
//!         self.0.fetch_add(*job, Ordering::SeqCst);
//!     }
//! }
//!
//! tokio_test::block_on(async {
//!     let sum = Arc::new(AtomicUsize::new(0));
//!
//!     let mut pipeline = Pipeline::<usize>::new();
//!     pipeline.set_generator(Arc::new(Numbers(AtomicUsize::new(0))));
//!     pipeline.add_stage(Arc::new(Sum(sum.clone())));
//!
//!     pipeline.run().await.unwrap();
//!
//!     assert_eq!(sum.load(Ordering::SeqCst), 55);
//! });
//! ```
//!
#![warn(missing_docs)]

use async_trait::async_trait;

pub use error::PipelineError;
pub use pipeline::{Config, Pipeline};

mod error;
mod pipeline;
pub(crate) mod queue;

/// Produces the jobs fed into a [Pipeline].
///
/// The pipeline calls [next](Generator::next) from a single feeder task, never
/// concurrently, until it yields [None]; the remaining jobs then drain through
/// every stage before [Pipeline::run] returns.
#[async_trait]
pub trait Generator<J>: Send + Sync {
    /// Identifies this generator in diagnostics.
    fn name(&self) -> &str;

    /// Yields the next job, or [None] when there is no more work.
    async fn next(&self) -> Option<J>;

    /// Cooperatively asks the generator to stop producing.
    ///
    /// Called from any task, possibly while [next](Generator::next) is
    /// blocked, so it must be safe to invoke more than once. Implementations
    /// must make a subsequent `next` call eventually return [None]; jobs
    /// already handed to the pipeline are still processed to completion.
    fn abort(&self);
}

/// One named processing step of a [Pipeline].
///
/// Each stage runs as a pool of [concurrency](Stage::concurrency) workers, so
/// [process](Stage::process) must tolerate that many simultaneous invocations.
/// It is never invoked twice concurrently on the *same* job.
#[async_trait]
pub trait Stage<J>: Send + Sync {
    /// Identifies this stage in diagnostics.
    fn name(&self) -> &str;

    /// How many workers the pipeline should run for this stage.
    ///
    /// Values below 1 are treated as 1. With more than one worker, jobs may
    /// leave the stage in a different order than they entered it.
    fn concurrency(&self) -> usize;

    /// Operates on one job.
    ///
    /// The stage communicates purely through side effects on the job: the
    /// pipeline forwards the job to the next stage unconditionally, so an
    /// error encountered here should be recorded on the job itself for a
    /// later stage to act on.
    async fn process(&self, job: &mut J);
}
