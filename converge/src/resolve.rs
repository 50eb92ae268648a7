//! Conflict Resolver: re-invokes the agent after a failed integrate attempt.
//!
//! The agent gets a reframed task (resolve the conflict, or fix the
//! regression the merge introduced) with the original task attached, and a
//! small inner budget of its own.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{MergeOutcome, Task, ValidationResult, Workspace};
use crate::errors::is_fatal;
use crate::io::agent::{Agent, AgentInvoker};
use crate::io::context::{ContextBuilder, ContextDocument};
use crate::io::merge::unresolved_paths;
use crate::io::validator::Validator;

/// What one resolver pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolution {
    pub agent_invocations: u32,
    /// The resolver saw the problem go away before handing back.
    pub resolved: bool,
}

/// Agent collaborators a resolver pass borrows from the controller.
pub struct ResolveTools<'r, 'a, V: Validator, A: Agent> {
    pub context: &'r mut ContextBuilder<'a, V>,
    pub invoker: &'r AgentInvoker<'a, A>,
    pub validator: &'a V,
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    attempts: u32,
}

impl ConflictResolver {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    #[instrument(skip_all, fields(cycle = cycle, conflict = outcome.conflict))]
    pub fn resolve<V: Validator, A: Agent>(
        &self,
        ws: &Workspace,
        task: &Task,
        outcome: &MergeOutcome,
        cycle: u32,
        tools: ResolveTools<'_, '_, V, A>,
    ) -> Result<Resolution> {
        if let Some(regression) = &outcome.regression {
            return self.fix_regression(ws, task, regression.clone(), cycle, tools);
        }
        if outcome.conflicted_paths.is_empty() {
            // The mainline moved between fetch and push, or a git step
            // failed; integrating again picks the new tip up.
            match &outcome.failure {
                Some(failure) => info!(failure = %failure, "git step failed; retrying integration"),
                None => info!("mainline moved upstream; retrying integration"),
            }
            return Ok(Resolution {
                agent_invocations: 0,
                resolved: true,
            });
        }
        self.resolve_conflicts(ws, task, outcome.conflicted_paths.clone(), cycle, tools)
    }

    fn resolve_conflicts<V: Validator, A: Agent>(
        &self,
        ws: &Workspace,
        task: &Task,
        mut paths: Vec<String>,
        cycle: u32,
        tools: ResolveTools<'_, '_, V, A>,
    ) -> Result<Resolution> {
        let framed = Task::new(format!(
            "Resolve the merge conflicts left by merging `{}` into this branch. \
             Original task: {}",
            ws.parent_branch,
            task.description()
        ));
        let mut resolution = Resolution::default();
        for attempt in 1..=self.attempts {
            let doc = tools.context.build_conflict(ws, &paths, cycle)?;
            resolution.agent_invocations += 1;
            invoke_retryable(tools.invoker, ws, &framed, &doc, attempt)?;
            paths = unresolved_paths(&ws.path, &paths)?;
            if paths.is_empty() {
                resolution.resolved = true;
                break;
            }
            info!(attempt, remaining = paths.len(), "conflict markers remain");
        }
        Ok(resolution)
    }

    fn fix_regression<V: Validator, A: Agent>(
        &self,
        ws: &Workspace,
        task: &Task,
        mut latest: ValidationResult,
        cycle: u32,
        tools: ResolveTools<'_, '_, V, A>,
    ) -> Result<Resolution> {
        let framed = Task::new(format!(
            "Fix the test regression introduced by merging `{}` into this branch. \
             Original task: {}",
            ws.parent_branch,
            task.description()
        ));
        let mut resolution = Resolution::default();
        for attempt in 1..=self.attempts {
            let doc = tools.context.build(ws, Some(&latest), cycle)?;
            resolution.agent_invocations += 1;
            invoke_retryable(tools.invoker, ws, &framed, &doc, attempt)?;
            // The next integrate attempt validates the final state itself.
            if attempt == self.attempts {
                break;
            }
            latest = tools.validator.run(ws)?;
            if latest.passed {
                resolution.resolved = true;
                break;
            }
        }
        Ok(resolution)
    }
}

fn invoke_retryable<A: Agent>(
    invoker: &AgentInvoker<'_, A>,
    ws: &Workspace,
    task: &Task,
    doc: &ContextDocument,
    attempt: u32,
) -> Result<()> {
    match invoker.invoke(ws, task, doc) {
        Ok(()) => Ok(()),
        Err(err) if is_fatal(&err) => Err(err),
        Err(err) => {
            warn!(attempt, err = %format!("{err:#}"), "resolver agent call failed");
            Ok(())
        }
    }
}
