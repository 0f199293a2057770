use crate::agent::{Generator, StepError};
use crate::checkpoint::Checkpoint;
use crate::hallucination::AnalysisResult;
use crate::message::{Conversation, Message, Role};
use crate::policy::{FINAL_ANALYSIS_MARKER, IterationPolicy, TrailingRounds};
use crate::repair::{DEFAULT_MAX_ATTEMPTS, respond_with_retries};
use crate::schema::{OutputSchema, Structured, StructuredAnswer, parse};
use crate::state::{AgentState, Step, Task, next_step};
use crate::tools::ToolExecutor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Passed to the `on_step` hook after each successful transition.
pub struct StepEvent<'a> {
    pub task: Task,
    pub from: Step,
    pub to: Step,
    pub duration: Duration,
    pub step_number: usize,
    /// Generator calls made by this step (0 for tool execution).
    pub attempts: usize,
    pub state: &'a AgentState,
}

/// Passed to the `on_error` hook when a step errors or a limit is exceeded.
pub struct ErrorEvent<'a> {
    pub task: Task,
    pub step: Step,
    pub error: &'a StepError,
    pub step_number: usize,
}

/// Why a run reached [`Step::Terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The actor stopped asking for tools, or produced its final analysis.
    Completed,
    /// The iteration policy cut the loop while research was still pending.
    IterationBound,
    /// A [`CancelToken`] fired. The state is whatever was reached so far.
    Cancelled,
}

/// The state a run ended in, and why.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: AgentState,
    pub stop: StopReason,
}

impl RunOutcome {
    pub fn conversation(&self) -> &Conversation {
        &self.state.conversation
    }

    /// The latest assistant turn that decodes as `T`.
    pub fn answer<T: Structured>(&self) -> Option<T> {
        self.state
            .conversation
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| parse::<T>(m).ok())
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.state.terminal_result.as_ref()
    }
}

/// Cooperative cancellation, checked before every transition.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the draft / execute-tools / revise loop for one [`Task`].
///
/// The runner owns the collaborators; the [`AgentState`] of a run is
/// created by [`run`](Runner::run) (or handed in via
/// [`run_from`](Runner::run_from)) and given back in the [`RunOutcome`].
pub struct Runner {
    generator: Box<dyn Generator>,
    tools: ToolExecutor,
    policy: Box<dyn IterationPolicy>,
    max_attempts: usize,
    max_steps: usize,
    checkpoint: Option<(Box<dyn Checkpoint>, String)>,
    cancel: CancelToken,
    on_step: Option<Box<dyn FnMut(&StepEvent)>>,
    on_error: Option<Box<dyn FnMut(&ErrorEvent)>>,
}

impl Runner {
    pub fn new(generator: impl Generator + 'static, tools: ToolExecutor) -> Self {
        Self {
            generator: Box::new(generator),
            tools,
            policy: Box::new(TrailingRounds::default()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_steps: 1_000,
            checkpoint: None,
            cancel: CancelToken::new(),
            on_step: None,
            on_error: None,
        }
    }

    pub fn with_policy(mut self, policy: impl IterationPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Generator calls per draft or revise turn (the repair loop bound).
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Prevent accidental infinite loops from a policy that never stops.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Save the state under `thread_id` after every transition.
    pub fn with_checkpoint(
        mut self,
        store: impl Checkpoint + 'static,
        thread_id: impl Into<String>,
    ) -> Self {
        self.checkpoint = Some((Box::new(store), thread_id.into()));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels this runner's current and future runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Register a callback that fires after each successful transition.
    pub fn on_step(mut self, cb: impl FnMut(&StepEvent) + 'static) -> Self {
        self.on_step = Some(Box::new(cb));
        self
    }

    /// Register a callback that fires when a step errors or a limit is exceeded.
    pub fn on_error(mut self, cb: impl FnMut(&ErrorEvent) + 'static) -> Self {
        self.on_error = Some(Box::new(cb));
        self
    }

    /// Set both hooks to emit `tracing` events for transitions and errors.
    pub fn with_tracing(self) -> Self {
        self.on_step(|e| {
            info!(
                task = e.task.name(),
                step = e.step_number,
                from = ?e.from,
                to = ?e.to,
                attempts = e.attempts,
                messages = e.state.conversation.len(),
                elapsed_ms = e.duration.as_millis() as u64,
                "transition"
            );
        })
        .on_error(|e| {
            error!(
                task = e.task.name(),
                step = e.step_number,
                at = ?e.step,
                error = %e.error,
                "run failed"
            );
        })
    }

    /// Start a fresh run of `task` for a single user request.
    pub fn run(&mut self, task: Task, prompt: impl Into<String>) -> Result<RunOutcome, StepError> {
        self.run_from(AgentState::new(task, prompt))
    }

    /// Continue the run saved under the configured checkpoint thread.
    pub fn resume(&mut self) -> Result<RunOutcome, StepError> {
        let Some((store, thread_id)) = &self.checkpoint else {
            return Err(StepError::invalid("resume needs a checkpoint store"));
        };
        let state = store
            .load(thread_id)?
            .ok_or_else(|| StepError::checkpoint(format!("no saved state for thread {thread_id}")))?;
        info!(thread_id = %thread_id, step = ?state.step, "resuming run");
        self.run_from(state)
    }

    /// Drive an explicit state until it is terminal.
    pub fn run_from(&mut self, mut state: AgentState) -> Result<RunOutcome, StepError> {
        let mut step_number: usize = 0;

        while !state.is_terminal() {
            if self.cancel.is_cancelled() {
                info!(task = state.task.name(), step = ?state.step, "run cancelled");
                self.save(&state)?;
                return Ok(RunOutcome {
                    state,
                    stop: StopReason::Cancelled,
                });
            }

            if step_number >= self.max_steps {
                let err = StepError::other(format!(
                    "max_steps exceeded (possible infinite loop) in {} run",
                    state.task.name()
                ));
                self.report(&state, &err, step_number);
                return Err(err);
            }
            step_number += 1;

            let from = state.step;
            let start = Instant::now();
            let attempts = match self.advance(&mut state) {
                Ok(attempts) => attempts,
                Err(err) => {
                    self.report(&state, &err, step_number);
                    return Err(err);
                }
            };

            let to = next_step(from, &state, self.policy.as_ref());
            state.step = to;
            debug!(task = state.task.name(), ?from, ?to, step_number, "step");

            if let Some(cb) = &mut self.on_step {
                cb(&StepEvent {
                    task: state.task,
                    from,
                    to,
                    duration: start.elapsed(),
                    step_number,
                    attempts,
                    state: &state,
                });
            }

            if to == Step::Terminal && state.task == Task::HallucinationCheck {
                state.terminal_result = Some(AnalysisResult::extract(&state.conversation));
            }

            self.save(&state)?;
        }

        let stop = if hit_bound(&state) {
            StopReason::IterationBound
        } else {
            StopReason::Completed
        };
        info!(
            task = state.task.name(),
            ?stop,
            iterations = state.iteration_count,
            "run finished"
        );
        Ok(RunOutcome { state, stop })
    }

    /// Perform the action of the current step. Returns generator calls made.
    fn advance(&mut self, state: &mut AgentState) -> Result<usize, StepError> {
        let schema = match state.step {
            Step::Draft => state.task.draft_schema(),
            Step::Revise => state.task.revise_schema(),
            Step::ExecuteTools => {
                let calls = state
                    .conversation
                    .last()
                    .filter(|m| m.role == Role::Assistant)
                    .map(|m| m.tool_calls.clone())
                    .unwrap_or_default();
                let results = self.tools.execute(&calls);
                state.conversation.extend(results.into_iter().map(Message::tool));
                return Ok(0);
            }
            Step::Terminal => return Ok(0),
        };

        let candidate = respond_with_retries(
            self.generator.as_mut(),
            &state.conversation,
            schema,
            self.max_attempts,
        )?;

        if let Some(error) = &candidate.error {
            warn!(
                ?schema,
                attempts = candidate.attempts,
                error = %error,
                "keeping last candidate after exhausting repair attempts"
            );
        } else if schema == OutputSchema::InitialAnswer
            && let Ok(answer) = parse::<StructuredAnswer>(&candidate.message)
            && answer.over_budget()
        {
            debug!(words = answer.word_count(), "answer over word budget");
        }

        state.conversation.push(candidate.message);
        state.iteration_count += 1;
        Ok(candidate.attempts)
    }

    fn save(&self, state: &AgentState) -> Result<(), StepError> {
        if let Some((store, thread_id)) = &self.checkpoint {
            store.save(thread_id, state)?;
        }
        Ok(())
    }

    fn report(&mut self, state: &AgentState, err: &StepError, step_number: usize) {
        if let Some(cb) = &mut self.on_error {
            cb(&ErrorEvent {
                task: state.task,
                step: state.step,
                error: err,
                step_number,
            });
        }
    }
}

/// Terminal while the actor still wanted research, and not because it
/// wrote the final-analysis marker.
fn hit_bound(state: &AgentState) -> bool {
    let marked = state
        .conversation
        .last()
        .is_some_and(|m| m.content.contains(FINAL_ANALYSIS_MARKER));
    state.pending_tool_requests() && !marked
}
