//! Pipeline configuration.

use rustc_hash::FxHashSet;
use tensile_core::ir::Opcode;
use tensile_passes::{DecomposeConfig, MissPolicy};

/// Knobs for a pipeline run.
///
/// The defaults reproduce the strict behavior: every composite is
/// attempted, nothing is denied, a denylisted miss aborts, the exported
/// flags recorded in the hierarchy decide which functions are public, and
/// every stage output is verified before it is committed.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Composite opcodes the decomposer may attempt; `None` attempts all.
    pub allow: Option<FxHashSet<Opcode>>,
    /// Composite opcodes that must not survive decomposition.
    pub deny: FxHashSet<Opcode>,
    /// What happens to a denylisted composite with no legal rule.
    pub policy: MissPolicy,
    /// Replaces the externally-callable set the flattener derived from the
    /// hierarchy's export flags. Names refer to post-flattening functions.
    pub public_functions: Option<Vec<String>>,
    /// Verify every stage output before committing it.
    pub verify_each_stage: bool,
}

impl Default for PipelineOptions {
    fn default() -> PipelineOptions {
        PipelineOptions {
            allow: None,
            deny: FxHashSet::default(),
            policy: MissPolicy::default(),
            public_functions: None,
            verify_each_stage: true,
        }
    }
}

impl PipelineOptions {
    pub(crate) fn decompose_config(&self) -> DecomposeConfig {
        DecomposeConfig { allow: self.allow.clone(), deny: self.deny.clone(), policy: self.policy }
    }
}
