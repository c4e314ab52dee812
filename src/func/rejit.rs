//! Phase orchestration and bounded rejit retries
//!
//! The controller runs the translator and then every later phase against a
//! fresh [`FuncRecord`] per attempt. A phase that proved an optimistic
//! assumption unsound exits with [`PhaseExit::Rejit`]; the controller
//! permanently disables the named optimization and restarts from scratch.
//! Each reason can fire at most once (the disabled flags are sticky and
//! monotonic), so the loop terminates in at most distinct-reasons + 1
//! attempts.

use tracing::{debug, trace};

use crate::bytecode::FunctionBody;
use crate::builder::IrBuilder;
use crate::profile::{ProfileSnapshot, RejitReason};

use super::error::{CompileError, CompileResult, FatalError, PhaseExit};
use super::{CancelToken, CompileConfig, CompiledUnit, FuncRecord, WorkItem};

/// One later pipeline phase (global opt, lowering, allocation, ...)
///
/// The phases themselves are external collaborators; the controller only
/// needs to run them in order and catch their exits at the attempt
/// boundary.
pub trait Phase {
    fn name(&self) -> &'static str;

    fn run(&mut self, func: &mut FuncRecord<'_>) -> Result<(), PhaseExit>;
}

/// Runs the pipeline for one unit, retrying on rejit signals
pub struct RejitController<'a> {
    body: &'a FunctionBody,
    profile: &'a ProfileSnapshot,
    work_item: WorkItem,
    config: CompileConfig,
    cancel: CancelToken,
}

impl<'a> RejitController<'a> {
    pub fn new(
        body: &'a FunctionBody,
        profile: &'a ProfileSnapshot,
        work_item: WorkItem,
        config: CompileConfig,
    ) -> Self {
        RejitController {
            body,
            profile,
            work_item,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Install a cancellation token for background attempts
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Translate only, with no later phases
    pub fn compile(&self) -> CompileResult<CompiledUnit> {
        self.compile_with_phases(&mut [])
    }

    /// Run the full pipeline: translation plus the given phases, in order
    ///
    /// Rejit exits are absorbed here and never surface to the caller; the
    /// attempt count is bounded by the fixed reason set.
    pub fn compile_with_phases(
        &self,
        phases: &mut [Box<dyn Phase + '_>],
    ) -> CompileResult<CompiledUnit> {
        // Upper bound is structural: each retry disables a fresh reason.
        let max_attempts = RejitReason::ALL.len() + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug_assert!(attempt <= max_attempts);
            trace!(
                function = self.body.name(),
                attempt,
                "starting compile attempt"
            );

            match self.run_attempt(phases) {
                Ok(unit) => {
                    debug!(
                        function = self.body.name(),
                        attempt,
                        instrs = unit.ir.len(),
                        "compile done"
                    );
                    return Ok(unit);
                }
                Err(PhaseExit::Aborted) => {
                    trace!(function = self.body.name(), "compile aborted");
                    return Err(CompileError::Aborted);
                }
                Err(PhaseExit::Fatal(err)) => return Err(CompileError::Fatal(err)),
                Err(PhaseExit::Rejit(reason)) => {
                    // Set-if-unset: a reason repeating after its opt was
                    // disabled is a phase bug, not a retry condition.
                    if !self.profile.disabled().disable(reason) {
                        return Err(CompileError::Fatal(FatalError::RejitReasonRepeated(
                            reason,
                        )));
                    }
                    debug!(
                        function = self.body.name(),
                        %reason,
                        attempt,
                        "rejit: retrying with optimization disabled"
                    );
                }
            }
        }
    }

    /// One attempt: fresh record, translate, run phases
    fn run_attempt(&self, phases: &mut [Box<dyn Phase + '_>]) -> Result<CompiledUnit, PhaseExit> {
        let mut func = FuncRecord::new(
            self.body,
            self.profile,
            self.work_item,
            self.config.clone(),
        )
        .map_err(PhaseExit::Fatal)?;

        IrBuilder::new(&mut func, self.cancel.clone()).build()?;

        for phase in phases.iter_mut() {
            // Phase boundaries are cancellation checkpoints.
            if self.cancel.is_cancelled() {
                return Err(PhaseExit::Aborted);
            }
            trace!(phase = phase.name(), "running phase");
            phase.run(&mut func)?;
        }

        if self.cancel.is_cancelled() {
            return Err(PhaseExit::Aborted);
        }

        Ok(func.finish())
    }
}
