//! Iteration state machine.
//!
//! The controller executes the side effects of each [`Phase`]; this module only
//! decides which phase comes next. Keeping the transition table pure lets the
//! retry, resolution, and termination rules be tested without subprocesses.

use serde::Serialize;

/// Coarse status reported for a running iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Running,
    Converged,
    MergeConflict,
    TestsFailing,
    Exhausted,
}

/// Terminal outcome of a controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    /// The workspace passed the gate and was integrated into the mainline.
    Success,
    /// The cycle budget ran out before the gate opened.
    Exhausted,
    /// Integration kept failing after the resolver's budget.
    MergeFailed,
    /// An interrupt arrived; nothing was pushed.
    Abandoned,
}

impl Terminal {
    pub fn as_str(self) -> &'static str {
        match self {
            Terminal::Success => "success",
            Terminal::Exhausted => "exhausted",
            Terminal::MergeFailed => "merge_failed",
            Terminal::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    BuildContext,
    Invoke,
    Validate,
    Retry,
    GateOpen,
    Integrate,
    Conflict,
    Resolve,
    Done,
    Terminal(Terminal),
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Terminal(_))
    }
}

/// Cycle bookkeeping owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationState {
    cycle: u32,
    max_cycles: u32,
    status: IterationStatus,
}

impl IterationState {
    pub fn new(max_cycles: u32) -> Self {
        Self {
            cycle: 0,
            max_cycles,
            status: IterationStatus::Running,
        }
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    pub fn status(&self) -> IterationStatus {
        self.status
    }

    /// Start the next cycle and return its 1-based number.
    pub fn begin_cycle(&mut self) -> u32 {
        self.cycle += 1;
        self.status = IterationStatus::Running;
        self.cycle
    }

    pub fn set_status(&mut self, status: IterationStatus) {
        self.status = status;
    }
}

/// Facts observed after executing a phase, consumed by [`next_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guards {
    pub cancelled: bool,
    pub cycle: u32,
    pub max_cycles: u32,
    /// Verdict of the most recent validation.
    pub passed: bool,
    /// The most recent integrate attempt needs the resolver.
    pub needs_resolution: bool,
    pub integrations: u32,
    pub max_integrations: u32,
}

/// Transition table for the iteration controller.
pub fn next_phase(phase: Phase, guards: &Guards) -> Phase {
    if let Phase::Terminal(terminal) = phase {
        return Phase::Terminal(terminal);
    }
    // The mainline already moved; an interrupt can no longer undo that.
    if phase == Phase::Done {
        return Phase::Terminal(Terminal::Success);
    }
    if phase == Phase::Integrate && !guards.needs_resolution {
        return Phase::Done;
    }
    if guards.cancelled {
        return Phase::Terminal(Terminal::Abandoned);
    }
    match phase {
        Phase::Init => Phase::BuildContext,
        Phase::BuildContext => Phase::Invoke,
        Phase::Invoke => Phase::Validate,
        Phase::Validate if guards.passed => Phase::GateOpen,
        Phase::Validate if guards.cycle < guards.max_cycles => Phase::Retry,
        Phase::Validate => Phase::Terminal(Terminal::Exhausted),
        Phase::Retry => Phase::BuildContext,
        Phase::GateOpen => Phase::Integrate,
        Phase::Integrate if !guards.needs_resolution => Phase::Done,
        Phase::Integrate if guards.integrations < guards.max_integrations => Phase::Conflict,
        Phase::Integrate => Phase::Terminal(Terminal::MergeFailed),
        Phase::Conflict => Phase::Resolve,
        Phase::Resolve => Phase::Integrate,
        Phase::Done => Phase::Terminal(Terminal::Success),
        Phase::Terminal(terminal) => Phase::Terminal(terminal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guards() -> Guards {
        Guards {
            cancelled: false,
            cycle: 1,
            max_cycles: 3,
            passed: false,
            needs_resolution: false,
            integrations: 0,
            max_integrations: 3,
        }
    }

    #[test]
    fn happy_path_reaches_success() {
        let g = Guards {
            passed: true,
            integrations: 1,
            ..guards()
        };
        let mut phase = Phase::Init;
        let mut seen = vec![phase];
        while !phase.is_terminal() {
            phase = next_phase(phase, &g);
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                Phase::Init,
                Phase::BuildContext,
                Phase::Invoke,
                Phase::Validate,
                Phase::GateOpen,
                Phase::Integrate,
                Phase::Done,
                Phase::Terminal(Terminal::Success),
            ]
        );
    }

    #[test]
    fn failed_validation_retries_until_budget() {
        assert_eq!(next_phase(Phase::Validate, &guards()), Phase::Retry);
        let last = Guards {
            cycle: 3,
            ..guards()
        };
        assert_eq!(
            next_phase(Phase::Validate, &last),
            Phase::Terminal(Terminal::Exhausted)
        );
        assert_eq!(next_phase(Phase::Retry, &guards()), Phase::BuildContext);
    }

    #[test]
    fn conflicts_route_through_resolver_until_bounded() {
        let conflicted = Guards {
            passed: true,
            needs_resolution: true,
            integrations: 1,
            ..guards()
        };
        assert_eq!(next_phase(Phase::Integrate, &conflicted), Phase::Conflict);
        assert_eq!(next_phase(Phase::Conflict, &conflicted), Phase::Resolve);
        assert_eq!(next_phase(Phase::Resolve, &conflicted), Phase::Integrate);

        let spent = Guards {
            integrations: 3,
            ..conflicted
        };
        assert_eq!(
            next_phase(Phase::Integrate, &spent),
            Phase::Terminal(Terminal::MergeFailed)
        );
    }

    #[test]
    fn cancellation_wins_before_integration_lands() {
        let cancelled = Guards {
            cancelled: true,
            passed: true,
            ..guards()
        };
        for phase in [
            Phase::Init,
            Phase::BuildContext,
            Phase::Invoke,
            Phase::Validate,
            Phase::Resolve,
        ] {
            assert_eq!(
                next_phase(phase, &cancelled),
                Phase::Terminal(Terminal::Abandoned)
            );
        }
        let unresolved = Guards {
            needs_resolution: true,
            ..cancelled
        };
        assert_eq!(
            next_phase(Phase::Integrate, &unresolved),
            Phase::Terminal(Terminal::Abandoned)
        );
    }

    /// An interrupt that arrives while a merge lands cannot undo the merge.
    #[test]
    fn landed_integration_wins_over_cancellation() {
        let cancelled = Guards {
            cancelled: true,
            passed: true,
            ..guards()
        };
        assert_eq!(next_phase(Phase::Integrate, &cancelled), Phase::Done);
        assert_eq!(
            next_phase(Phase::Done, &cancelled),
            Phase::Terminal(Terminal::Success)
        );
    }

    #[test]
    fn terminal_is_absorbing() {
        let cancelled = Guards {
            cancelled: true,
            ..guards()
        };
        let done = Phase::Terminal(Terminal::Success);
        assert_eq!(next_phase(done, &cancelled), done);
    }

    #[test]
    fn cycle_count_is_monotonic() {
        let mut state = IterationState::new(2);
        state.set_status(IterationStatus::TestsFailing);
        assert_eq!(state.begin_cycle(), 1);
        assert_eq!(state.status(), IterationStatus::Running);
        assert_eq!(state.begin_cycle(), 2);
        assert_eq!(state.cycle(), 2);
        assert_eq!(state.max_cycles(), 2);
    }
}
