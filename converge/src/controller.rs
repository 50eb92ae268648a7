//! Iteration Controller: drives one workspace to a terminal outcome.
//!
//! Each loop turn executes the side effects of the current [`Phase`], gathers
//! the resulting facts into [`Guards`], and asks [`next_phase`] where to go.
//! Nothing here decides a transition on its own.

use std::time::Instant;

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::state::{Guards, IterationState, IterationStatus, Phase, Terminal, next_phase};
use crate::core::types::{MergeOutcome, Task, ValidationResult, Workspace};
use crate::errors::is_fatal;
use crate::io::agent::{Agent, AgentInvoker};
use crate::io::artifacts::ArtifactPaths;
use crate::io::context::{ContextBuilder, ContextDocument};
use crate::io::cycle_log::{CycleRecord, write_cycle_record};
use crate::io::merge::Integrator;
use crate::io::validator::Validator;
use crate::resolve::{ConflictResolver, ResolveTools};
use crate::signals::CancelFlag;

/// What a run did and how it ended.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: Terminal,
    pub status: IterationStatus,
    pub cycles: u32,
    pub context_builds: u32,
    pub agent_invocations: u32,
    /// Resolver passes (one per failed integrate attempt that was retried).
    pub resolutions: u32,
    pub integrations: u32,
    #[serde(skip)]
    pub last_validation: Option<ValidationResult>,
    #[serde(skip)]
    pub merge: Option<MergeOutcome>,
}

/// Budgets the controller enforces.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_cycles: u32,
    pub max_integrations: u32,
    pub resolve_attempts: u32,
}

pub struct Controller<'a, V: Validator, A: Agent, I: Integrator> {
    task: &'a Task,
    validator: &'a V,
    context: ContextBuilder<'a, V>,
    invoker: AgentInvoker<'a, A>,
    integrator: &'a I,
    resolver: ConflictResolver,
    cancel: CancelFlag,
    max_integrations: u32,
    state: IterationState,
}

/// Per-run counters and the latest observations.
#[derive(Default)]
struct Progress {
    context_builds: u32,
    agent_invocations: u32,
    resolutions: u32,
    integrations: u32,
    latest: Option<ValidationResult>,
    document: Option<ContextDocument>,
    merge: Option<MergeOutcome>,
    agent_error: Option<String>,
    cycle_started: Option<(chrono::DateTime<Utc>, Instant)>,
}

impl<'a, V: Validator, A: Agent, I: Integrator> Controller<'a, V, A, I> {
    pub fn new(
        task: &'a Task,
        validator: &'a V,
        context: ContextBuilder<'a, V>,
        invoker: AgentInvoker<'a, A>,
        integrator: &'a I,
        limits: Limits,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            task,
            validator,
            context,
            invoker,
            integrator,
            resolver: ConflictResolver::new(limits.resolve_attempts),
            cancel,
            max_integrations: limits.max_integrations,
            state: IterationState::new(limits.max_cycles),
        }
    }

    /// Run the state machine until it reaches a terminal phase.
    ///
    /// Fatal errors (environment, missing tools) and unexpected git or
    /// filesystem failures are returned; everything else ends in a report.
    #[instrument(skip_all, fields(branch = %ws.branch))]
    pub fn drive(&mut self, ws: &Workspace) -> Result<RunReport> {
        let mut progress = Progress::default();
        let mut phase = Phase::Init;
        loop {
            if let Phase::Terminal(outcome) = phase {
                return Ok(self.finish(outcome, progress));
            }
            self.execute(phase, ws, &mut progress)?;
            let guards = Guards {
                cancelled: self.cancel.is_cancelled(),
                cycle: self.state.cycle(),
                max_cycles: self.state.max_cycles(),
                passed: progress.latest.as_ref().is_some_and(|r| r.passed),
                needs_resolution: progress
                    .merge
                    .as_ref()
                    .is_some_and(MergeOutcome::needs_resolution),
                integrations: progress.integrations,
                max_integrations: self.max_integrations,
            };
            let next = next_phase(phase, &guards);
            debug!(from = ?phase, to = ?next, "transition");
            phase = next;
        }
    }

    fn execute(&mut self, phase: Phase, ws: &Workspace, progress: &mut Progress) -> Result<()> {
        match phase {
            Phase::Init => self.start_cycle(progress),
            Phase::BuildContext => {
                let cycle = self.state.cycle();
                let doc = self.context.build(ws, progress.latest.as_ref(), cycle)?;
                progress.context_builds += 1;
                progress.document = Some(doc);
            }
            Phase::Invoke => {
                let doc = progress
                    .document
                    .as_ref()
                    .ok_or_else(|| anyhow!("no context document for cycle"))?;
                progress.agent_invocations += 1;
                progress.agent_error = None;
                if let Err(err) = self.invoker.invoke(ws, self.task, doc) {
                    if is_fatal(&err) {
                        return Err(err);
                    }
                    warn!(cycle = self.state.cycle(), err = %format!("{err:#}"), "agent call failed; validating anyway");
                    progress.agent_error = Some(format!("{err:#}"));
                }
            }
            Phase::Validate => {
                let result = self.validator.run(ws)?;
                if !result.passed {
                    self.state.set_status(IterationStatus::TestsFailing);
                }
                self.record_cycle(ws, &result, progress)?;
                info!(
                    cycle = self.state.cycle(),
                    max_cycles = self.state.max_cycles(),
                    summary = %result.summary(),
                    "cycle validated"
                );
                progress.latest = Some(result);
            }
            Phase::Retry => {
                ArtifactPaths::new(&ws.path).clear_cycle_artifacts()?;
                self.start_cycle(progress);
            }
            Phase::GateOpen => info!(cycle = self.state.cycle(), "gate open; integrating"),
            Phase::Integrate => {
                progress.integrations += 1;
                let outcome = self.integrator.integrate(ws)?;
                if outcome.needs_resolution() {
                    self.state.set_status(IterationStatus::MergeConflict);
                }
                info!(
                    attempt = progress.integrations,
                    success = outcome.success,
                    conflict = outcome.conflict,
                    regression = outcome.regression.is_some(),
                    "integrate attempt finished"
                );
                progress.merge = Some(outcome);
            }
            Phase::Conflict => warn!(
                attempt = progress.integrations,
                max = self.max_integrations,
                "integration needs resolution"
            ),
            Phase::Resolve => {
                let outcome = progress
                    .merge
                    .clone()
                    .ok_or_else(|| anyhow!("no merge outcome to resolve"))?;
                progress.resolutions += 1;
                let resolution = self.resolver.resolve(
                    ws,
                    self.task,
                    &outcome,
                    self.state.cycle(),
                    ResolveTools {
                        context: &mut self.context,
                        invoker: &self.invoker,
                        validator: self.validator,
                    },
                )?;
                progress.context_builds += resolution.agent_invocations;
                progress.agent_invocations += resolution.agent_invocations;
                info!(
                    resolved = resolution.resolved,
                    agent_invocations = resolution.agent_invocations,
                    "resolver pass finished"
                );
            }
            Phase::Done => self.state.set_status(IterationStatus::Converged),
            Phase::Terminal(_) => {}
        }
        Ok(())
    }

    fn start_cycle(&mut self, progress: &mut Progress) {
        let cycle = self.state.begin_cycle();
        progress.cycle_started = Some((Utc::now(), Instant::now()));
        info!(cycle, max_cycles = self.state.max_cycles(), "cycle started");
    }

    fn record_cycle(&self, ws: &Workspace, result: &ValidationResult, progress: &Progress) -> Result<()> {
        let (started_at, started) = progress
            .cycle_started
            .unwrap_or_else(|| (Utc::now(), Instant::now()));
        let record = CycleRecord {
            cycle: self.state.cycle(),
            passed: result.passed,
            failing_tests: result.failing_tests.clone(),
            lint_findings: result.lint_findings.len(),
            focus_test: progress
                .document
                .as_ref()
                .and_then(|doc| doc.focus_test.clone()),
            agent_error: progress.agent_error.clone(),
            started_at: started_at.to_rfc3339(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        write_cycle_record(&ws.path, &record)?;
        Ok(())
    }

    fn finish(&mut self, outcome: Terminal, progress: Progress) -> RunReport {
        if outcome == Terminal::Exhausted {
            self.state.set_status(IterationStatus::Exhausted);
        }
        let report = RunReport {
            outcome,
            status: self.state.status(),
            cycles: self.state.cycle(),
            context_builds: progress.context_builds,
            agent_invocations: progress.agent_invocations,
            resolutions: progress.resolutions,
            integrations: progress.integrations,
            last_validation: progress.latest,
            merge: progress.merge,
        };
        info!(
            outcome = outcome.as_str(),
            cycles = report.cycles,
            agent_invocations = report.agent_invocations,
            integrations = report.integrations,
            "run finished"
        );
        report
    }
}
