//! Graph rewrite passes and the pass pipeline for kiln.
//!
//! This crate takes a `kiln_core::Graph` and rewrites it in place through an
//! ordered list of passes:
//! 1. **Variable-ref resolution** - fold reference-indirection nodes into
//!    canonical-variable annotations
//! 2. **Resource identity** - group stateful resource ops by handle
//! 3. **Pad/Slice elimination** - drop pads whose padding no slice reads
//! 4. **Transpose/broadcast elimination** - drop transposes of layout-free
//!    broadcast constants
//! 5. **Slice hoisting** - move slices in front of elementwise chains
//! 6. **Ref copy insertion** - protect in-place writes with explicit copies
//!
//! # Example
//!
//! ```
//! use kiln_compiler::{PassPipeline, PipelineOptions};
//! use kiln_core::{Graph, PassContext};
//!
//! # fn main() -> kiln_core::Result<()> {
//! let mut graph = Graph::new("main");
//! let pipeline = PassPipeline::with_default_passes(PipelineOptions::default());
//! let report = pipeline.run_to_fixed_point(&mut graph, &PassContext::default())?;
//! assert!(!report.changed());
//! # Ok(())
//! # }
//! ```

pub mod passes;

pub use passes::{
    PadSliceEliminationPass, RefCopyInsertionPass, ResourceIdentityPass, SliceHoistPass,
    TransposeBroadcastPass, VariableRefResolutionPass,
};

// Re-export commonly used types from kiln-core
pub use kiln_core::{Error, Graph, OptLevel, Pass, PassContext, PassStatus, Result};

/// Pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Passes whose minimum level exceeds this are skipped.
    pub opt_level: OptLevel,

    /// Upper bound on rounds in [`PassPipeline::run_to_fixed_point`].
    pub max_iterations: usize,

    /// Abort on the first failing pass. When false, the failure is recorded
    /// in the report and the remaining passes still run.
    pub fail_fast: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::O2,
            max_iterations: 8,
            fail_fast: true,
        }
    }
}

/// What happened to one pass in one round.
#[derive(Debug)]
pub enum PassOutcome {
    Ran(PassStatus),
    /// Not enabled at the configured optimization level.
    Skipped,
    /// Failed while `fail_fast` was off.
    Failed(Error),
}

/// One entry of a [`PipelineReport`].
#[derive(Debug)]
pub struct PassRecord {
    pub pass: String,
    pub iteration: usize,
    pub outcome: PassOutcome,
}

/// Per-pass outcomes of a pipeline run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub records: Vec<PassRecord>,

    /// Rounds executed.
    pub iterations: usize,

    /// Whether the last round changed nothing.
    pub converged: bool,
}

impl PipelineReport {
    /// Whether any pass changed the graph.
    pub fn changed(&self) -> bool {
        self.records
            .iter()
            .any(|record| matches!(record.outcome, PassOutcome::Ran(PassStatus::Success)))
    }

    /// Failures recorded while `fail_fast` was off.
    pub fn failures(&self) -> impl Iterator<Item = &PassRecord> {
        self.records
            .iter()
            .filter(|record| matches!(record.outcome, PassOutcome::Failed(_)))
    }

    fn changed_in(&self, iteration: usize) -> bool {
        self.records.iter().any(|record| {
            record.iteration == iteration
                && matches!(record.outcome, PassOutcome::Ran(PassStatus::Success))
        })
    }
}

/// Ordered pass driver.
///
/// Passes run strictly in registration order, one at a time, each with
/// exclusive access to the graph. There is no rollback: a failing pass may
/// leave part of its rewrite applied, so callers needing atomicity clone the
/// graph before `run`.
pub struct PassPipeline {
    passes: Vec<Box<dyn Pass>>,
    options: PipelineOptions,
}

impl PassPipeline {
    /// Create an empty pipeline.
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            passes: Vec::new(),
            options,
        }
    }

    /// Create a pipeline with the built-in passes.
    ///
    /// Reference indirections are resolved and resource groups stamped
    /// first, then the shape rewrites run, and copy insertion goes last so
    /// it sees the final producers of every reference input.
    pub fn with_default_passes(options: PipelineOptions) -> Self {
        let mut pipeline = Self::new(options);
        pipeline
            .add_pass(VariableRefResolutionPass::new())
            .add_pass(ResourceIdentityPass::new())
            .add_pass(PadSliceEliminationPass::new())
            .add_pass(TransposeBroadcastPass::new())
            .add_pass(SliceHoistPass::new())
            .add_pass(RefCopyInsertionPass::new());
        pipeline
    }

    /// Add a pass to the end of the pipeline.
    ///
    /// # Returns
    ///
    /// Returns a mutable reference to self for method chaining.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Names of the registered passes, in run order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Run every enabled pass once, in order.
    ///
    /// # Errors
    ///
    /// With `fail_fast` set, returns the first pass failure wrapped in
    /// [`Error::PassFailed`]. In debug builds a pass that leaves the graph
    /// structurally invalid is reported the same way.
    #[tracing::instrument(skip_all, fields(graph = graph.name(), num_nodes = graph.node_count()))]
    pub fn run(&self, graph: &mut Graph, ctx: &PassContext) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        self.run_round(graph, ctx, 0, &mut report)?;
        report.iterations = 1;
        report.converged = !report.changed_in(0);
        Ok(report)
    }

    /// Run rounds until no pass changes the graph or `max_iterations` is hit.
    ///
    /// # Errors
    ///
    /// Same as [`PassPipeline::run`].
    #[tracing::instrument(skip_all, fields(graph = graph.name(), num_nodes = graph.node_count()))]
    pub fn run_to_fixed_point(
        &self,
        graph: &mut Graph,
        ctx: &PassContext,
    ) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        for iteration in 0..self.options.max_iterations {
            self.run_round(graph, ctx, iteration, &mut report)?;
            report.iterations = iteration + 1;
            if !report.changed_in(iteration) {
                report.converged = true;
                break;
            }
        }

        if !report.converged {
            tracing::warn!(
                iterations = report.iterations,
                "pipeline did not reach a fixed point"
            );
        }
        Ok(report)
    }

    fn run_round(
        &self,
        graph: &mut Graph,
        ctx: &PassContext,
        iteration: usize,
        report: &mut PipelineReport,
    ) -> Result<()> {
        for pass in &self.passes {
            let outcome = if pass.min_opt_level() > self.options.opt_level {
                tracing::debug!(pass = pass.name(), "pass disabled at this opt level");
                PassOutcome::Skipped
            } else {
                let _span = tracing::debug_span!(
                    "pass",
                    name = pass.name(),
                    min_opt_level = ?pass.min_opt_level()
                )
                .entered();
                match Self::run_pass(pass.as_ref(), graph, ctx) {
                    Ok(status) => PassOutcome::Ran(status),
                    Err(e) if self.options.fail_fast => return Err(e),
                    Err(e) => {
                        tracing::debug!(error = %e, "pass failed, continuing");
                        PassOutcome::Failed(e)
                    }
                }
            };

            report.records.push(PassRecord {
                pass: pass.name().to_string(),
                iteration,
                outcome,
            });
        }
        Ok(())
    }

    fn run_pass(pass: &dyn Pass, graph: &mut Graph, ctx: &PassContext) -> Result<PassStatus> {
        let wrap = |source: Error| Error::PassFailed {
            pass: pass.name().to_string(),
            source: Box::new(source),
        };

        let status = pass.run(graph, ctx).map_err(wrap)?;
        if cfg!(debug_assertions) {
            graph.validate().map_err(wrap)?;
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports `Success` for its first `changes` runs.
    struct CountdownPass {
        changes: AtomicUsize,
        level: OptLevel,
    }

    impl CountdownPass {
        fn new(changes: usize) -> Self {
            Self {
                changes: AtomicUsize::new(changes),
                level: OptLevel::O1,
            }
        }
    }

    impl Pass for CountdownPass {
        fn name(&self) -> &str {
            "countdown"
        }

        fn min_opt_level(&self) -> OptLevel {
            self.level
        }

        fn run(&self, _graph: &mut Graph, _ctx: &PassContext) -> Result<PassStatus> {
            let left = self.changes.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(PassStatus::NotChanged);
            }
            self.changes.store(left - 1, Ordering::SeqCst);
            Ok(PassStatus::Success)
        }
    }

    struct FailingPass;

    impl Pass for FailingPass {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self, _graph: &mut Graph, _ctx: &PassContext) -> Result<PassStatus> {
            Err(Error::InvalidGraph("boom".to_string()))
        }
    }

    #[test]
    fn test_default_pass_order() {
        let pipeline = PassPipeline::with_default_passes(PipelineOptions::default());
        assert_eq!(
            pipeline.pass_names(),
            vec![
                "variable_ref_resolution",
                "resource_identity",
                "pad_slice_elimination",
                "transpose_broadcast_elimination",
                "slice_hoist",
                "ref_copy_insertion",
            ]
        );
    }

    #[test]
    fn test_fixed_point_stops_when_unchanged() {
        let mut pipeline = PassPipeline::new(PipelineOptions::default());
        pipeline.add_pass(CountdownPass::new(2));

        let mut graph = Graph::default();
        let report = pipeline
            .run_to_fixed_point(&mut graph, &PassContext::default())
            .unwrap();

        assert_eq!(report.iterations, 3);
        assert!(report.converged);
        assert!(report.changed());
    }

    #[test]
    fn test_fixed_point_respects_max_iterations() {
        let options = PipelineOptions {
            max_iterations: 2,
            ..PipelineOptions::default()
        };
        let mut pipeline = PassPipeline::new(options);
        pipeline.add_pass(CountdownPass::new(10));

        let mut graph = Graph::default();
        let report = pipeline
            .run_to_fixed_point(&mut graph, &PassContext::default())
            .unwrap();

        assert_eq!(report.iterations, 2);
        assert!(!report.converged);
    }

    #[test]
    fn test_opt_level_skips_pass() {
        let options = PipelineOptions {
            opt_level: OptLevel::O0,
            ..PipelineOptions::default()
        };
        let mut pipeline = PassPipeline::new(options);
        pipeline.add_pass(CountdownPass::new(1));

        let mut graph = Graph::default();
        let report = pipeline.run(&mut graph, &PassContext::default()).unwrap();

        assert!(matches!(report.records[0].outcome, PassOutcome::Skipped));
        assert!(!report.changed());
    }

    #[test]
    fn test_failure_wrapped_with_pass_name() {
        let mut pipeline = PassPipeline::new(PipelineOptions::default());
        pipeline.add_pass(FailingPass);

        let mut graph = Graph::default();
        let err = pipeline
            .run(&mut graph, &PassContext::default())
            .unwrap_err();

        match err {
            Error::PassFailed { pass, .. } => assert_eq!(pass, "failing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failure_recorded_without_fail_fast() {
        let options = PipelineOptions {
            fail_fast: false,
            ..PipelineOptions::default()
        };
        let mut pipeline = PassPipeline::new(options);
        pipeline.add_pass(FailingPass).add_pass(CountdownPass::new(1));

        let mut graph = Graph::default();
        let report = pipeline.run(&mut graph, &PassContext::default()).unwrap();

        assert_eq!(report.failures().count(), 1);
        assert!(report.changed());
    }
}
