//! Rewrite pass trait and its outcome types.

use crate::Result;
use crate::context::PassContext;
use crate::ir::Graph;

/// Outcome of a pass that did not fail.
///
/// Failure is the `Err` side of the pass's `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassStatus {
    /// The pass mutated the graph.
    Success,

    /// The pass found nothing to rewrite; the graph is untouched.
    NotChanged,
}

impl PassStatus {
    /// `Success` if `changed`, `NotChanged` otherwise.
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            PassStatus::Success
        } else {
            PassStatus::NotChanged
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, PassStatus::Success)
    }
}

/// Optimization level a pipeline runs at.
///
/// A pass runs only when the pipeline's level is at least the pass's
/// [`Pass::min_opt_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OptLevel {
    /// Only passes required for correctness.
    O0,
    O1,
    #[default]
    O2,
    /// Aggressive rewrites.
    O3,
}

/// Trait for implementing graph rewrite passes.
///
/// A pass is a function of one graph: it rediscovers its matches by scanning
/// node kinds and attributes, performs local surgery, and returns. It must
/// not keep references into the graph past `run`. Passes communicate only
/// through the graph they mutate.
///
/// # Return Value
///
/// * `Ok(PassStatus::Success)` if the pass changed the graph.
/// * `Ok(PassStatus::NotChanged)` if the graph is untouched.
/// * `Err(_)` on a hard failure. The graph may then hold the rewrites applied
///   before the failing match; there is no rollback, so callers needing
///   atomicity clone the graph first.
///
/// # Example
///
/// ```
/// use kiln_core::{Graph, Pass, PassContext, PassStatus, Result};
///
/// struct CountNodes;
///
/// impl Pass for CountNodes {
///     fn name(&self) -> &str {
///         "count_nodes"
///     }
///
///     fn run(&self, graph: &mut Graph, _ctx: &PassContext) -> Result<PassStatus> {
///         let _ = graph.node_count();
///         Ok(PassStatus::NotChanged)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and error context).
    fn name(&self) -> &str;

    /// Lowest optimization level at which the pipeline runs this pass.
    fn min_opt_level(&self) -> OptLevel {
        OptLevel::O1
    }

    /// Run the pass on the given graph.
    fn run(&self, graph: &mut Graph, ctx: &PassContext) -> Result<PassStatus>;
}
