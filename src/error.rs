use thiserror::Error;

/// Errors reported before the pipeline launches any task.
///
/// Both conditions are detected synchronously at the start of
/// [run](crate::Pipeline::run) or [abort](crate::Pipeline::abort), so a
/// failed call never leaves a half-started pipeline behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// No generator was registered; call
    /// [set_generator](crate::Pipeline::set_generator) first.
    #[error("pipeline: no generator has been set")]
    NoGenerator,

    /// No stages were registered; call
    /// [add_stage](crate::Pipeline::add_stage) first.
    #[error("pipeline: there are no stages defined")]
    NoStages,
}
