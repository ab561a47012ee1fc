//! The sequential stage driver.
//!
//! Runs the nine passes in their fixed order. After every pass the new
//! program's arenas are compacted and, unless verification is switched
//! off, checked against the rules that stage must establish; only then is
//! it committed as the next stage's input. A failing stage aborts the run
//! with a [`PipelineError`] naming the stage; nothing after it executes.
//!
//! The variant table and decomposition registry start from the built-in
//! rule sets and can be extended before running.

use rustc_hash::FxHashSet;
use tensile_core::ir::{Program, VerifyConfig, Visibility, verify_program};
use tensile_core::{Diagnostic, FuncId, SourceLoc};
use tensile_passes::{
    CallingConventionAdjuster, CallingConventionStats, CompositeDecomposer, DecomposeStats,
    GlobalizeStats, GraphPreparer, InlineSlotsStats, ObjectGraphFlattener, OperatorVariantReducer,
    PrepareStats, PublicReturnRefiner, PublicReturnStats, ReduceVariantsStats, RefineTypesStats,
    SlotInliner, TypeRefiner, ValueSemanticsMaximizer, ValueSemanticsStats,
};
use tensile_rules::{DecompositionRegistry, VariantTable};
use thiserror::Error;

use crate::options::PipelineOptions;

/// A stage failure, wrapping the diagnostic with the stage that raised it.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("stage `{stage}` failed: {diagnostic}")]
pub struct PipelineError {
    pub stage: &'static str,
    pub diagnostic: Diagnostic,
}

/// Per-stage counts, aggregated across the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub prepare: PrepareStats,
    pub globalize: GlobalizeStats,
    pub inline_slots: InlineSlotsStats,
    pub reduce_variants: ReduceVariantsStats,
    pub value_semantics: ValueSemanticsStats,
    pub decompose: DecomposeStats,
    pub refine_types: RefineTypesStats,
    pub public_return: PublicReturnStats,
    pub calling_convention: CallingConventionStats,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub program: Program,
    pub stats: PipelineStats,
    pub warnings: Vec<Diagnostic>,
}

/// The whole-program lowering pipeline.
pub struct Pipeline {
    options: PipelineOptions,
    variants: VariantTable,
    rules: DecompositionRegistry,
}

impl Default for Pipeline {
    fn default() -> Pipeline {
        Pipeline::new()
    }
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline::with_options(PipelineOptions::default())
    }

    pub fn with_options(options: PipelineOptions) -> Pipeline {
        Pipeline {
            options,
            variants: VariantTable::with_defaults(),
            rules: DecompositionRegistry::with_defaults(),
        }
    }

    /// The variant table the reducer will use.
    pub fn variants_mut(&mut self) -> &mut VariantTable {
        &mut self.variants
    }

    /// The decomposition registry the decomposer will use.
    pub fn rules_mut(&mut self) -> &mut DecompositionRegistry {
        &mut self.rules
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(&self, program: Program) -> Result<PipelineOutput, PipelineError> {
        let mut stats = PipelineStats::default();
        let mut warnings = Vec::new();

        if self.options.verify_each_stage {
            verify_program(&program, &VerifyConfig::imported()).map_err(Self::fail("import"))?;
        }

        let out = GraphPreparer::new(program).run().map_err(Self::fail("prepare"))?;
        stats.prepare = out.stats;
        let program = self.commit("prepare", out.program, VerifyConfig::imported())?;

        let out = ObjectGraphFlattener::new(program).run().map_err(Self::fail("globalize"))?;
        stats.globalize = out.stats;
        let mut program = out.program;
        self.apply_public_override(&mut program).map_err(Self::fail("globalize"))?;
        let program = self.commit("globalize", program, VerifyConfig::flattened())?;

        let out = SlotInliner::new(program).run().map_err(Self::fail("inline_slots"))?;
        stats.inline_slots = out.stats;
        let program = self.commit("inline_slots", out.program, VerifyConfig::flattened())?;

        let out = OperatorVariantReducer::new(program, &self.variants)
            .run()
            .map_err(Self::fail("reduce_variants"))?;
        stats.reduce_variants = out.stats;
        let program = self.commit("reduce_variants", out.program, VerifyConfig::reduced())?;

        let out = ValueSemanticsMaximizer::new(program)
            .run()
            .map_err(Self::fail("value_semantics"))?;
        stats.value_semantics = out.stats;
        let program = self.commit("value_semantics", out.program, VerifyConfig::value_semantic())?;

        let out = CompositeDecomposer::new(program, &self.rules, self.options.decompose_config())
            .run()
            .map_err(Self::fail("decompose"))?;
        stats.decompose = out.stats;
        warnings.extend(out.warnings);
        let program = self.commit("decompose", out.program, VerifyConfig::value_semantic())?;

        let out = TypeRefiner::new(program).run().map_err(Self::fail("refine_types"))?;
        stats.refine_types = out.stats;
        let program = self.commit("refine_types", out.program, VerifyConfig::value_semantic())?;

        let out = PublicReturnRefiner::new(program).run().map_err(Self::fail("public_return"))?;
        stats.public_return = out.stats;
        let program = self.commit("public_return", out.program, VerifyConfig::value_semantic())?;

        let out = CallingConventionAdjuster::new(program)
            .run()
            .map_err(Self::fail("calling_convention"))?;
        stats.calling_convention = out.stats;
        let program = self.commit("calling_convention", out.program, VerifyConfig::value_semantic())?;

        Ok(PipelineOutput { program, stats, warnings })
    }

    fn fail(stage: &'static str) -> impl FnOnce(Diagnostic) -> PipelineError {
        move |diagnostic| PipelineError { stage, diagnostic }
    }

    fn commit(
        &self,
        stage: &'static str,
        mut program: Program,
        config: VerifyConfig,
    ) -> Result<Program, PipelineError> {
        program.compact().map_err(Self::fail(stage))?;
        if self.options.verify_each_stage {
            verify_program(&program, &config).map_err(Self::fail(stage))?;
        }
        Ok(program)
    }

    /// Replace the externally-callable set with the configured one.
    fn apply_public_override(&self, program: &mut Program) -> Result<(), Diagnostic> {
        let Some(named) = &self.options.public_functions else {
            return Ok(());
        };
        let mut wanted: FxHashSet<&str> = named.iter().map(String::as_str).collect();
        let ids: Vec<FuncId> = program.func_ids().collect();
        for f in ids {
            let func = program.function_mut(f);
            let public = wanted.remove(func.name.as_str());
            func.visibility = if public { Visibility::Public } else { Visibility::Private };
        }
        if let Some(missing) = wanted.into_iter().next() {
            return Err(Diagnostic::structural(
                SourceLoc::unknown(),
                missing,
                "public-function override names an unknown function",
            ));
        }
        Ok(())
    }
}
