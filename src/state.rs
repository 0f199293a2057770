use crate::hallucination::AnalysisResult;
use crate::message::{Conversation, Role};
use crate::policy::IterationPolicy;
use crate::schema::OutputSchema;
use serde::{Deserialize, Serialize};

/// Where a run is in the draft / research / revise loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Draft,
    ExecuteTools,
    Revise,
    Terminal,
}

/// Which loop a run drives. Each task names the schema its draft and
/// revise turns must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    /// Answer, critique, research, revise with citations.
    Reflexion,
    /// Free-text agent with a search tool (`agent <-> tools`).
    Retrieval,
    /// Extract claims, verify each against search results, classify.
    HallucinationCheck,
}

impl Task {
    pub fn draft_schema(&self) -> OutputSchema {
        match self {
            Self::Reflexion => OutputSchema::InitialAnswer,
            Self::Retrieval => OutputSchema::FreeText,
            Self::HallucinationCheck => OutputSchema::ClaimExtraction,
        }
    }

    pub fn revise_schema(&self) -> OutputSchema {
        match self {
            Self::Reflexion => OutputSchema::RevisedAnswer,
            Self::Retrieval => OutputSchema::FreeText,
            Self::HallucinationCheck => OutputSchema::FinalAnalysis,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Reflexion => "reflexion",
            Self::Retrieval => "retrieval",
            Self::HallucinationCheck => "hallucination_check",
        }
    }
}

/// Everything one run owns. Mutated only by the runner; serializable so a
/// checkpoint can resume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub task: Task,
    pub step: Step,
    pub conversation: Conversation,
    /// Generator rounds completed (draft counts as the first).
    pub iteration_count: usize,
    pub terminal_result: Option<AnalysisResult>,
}

impl AgentState {
    pub fn new(task: Task, prompt: impl Into<String>) -> Self {
        Self {
            task,
            step: Step::Draft,
            conversation: Conversation::from_user(prompt),
            iteration_count: 0,
            terminal_result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.step == Step::Terminal
    }

    /// True when the most recent assistant turn is also the most recent
    /// message and asks for a search.
    pub fn pending_tool_requests(&self) -> bool {
        self.conversation
            .last()
            .is_some_and(|m| m.role == Role::Assistant && m.requests_tools())
    }
}

/// The transition function. Pure: it reads the state and the policy and
/// never touches a collaborator.
pub fn next_step(step: Step, state: &AgentState, policy: &dyn IterationPolicy) -> Step {
    match step {
        Step::Draft => {
            if state.pending_tool_requests() {
                Step::ExecuteTools
            } else {
                Step::Terminal
            }
        }
        Step::ExecuteTools => Step::Revise,
        Step::Revise => {
            if policy.should_stop(&state.conversation) || !state.pending_tool_requests() {
                Step::Terminal
            } else {
                Step::ExecuteTools
            }
        }
        Step::Terminal => Step::Terminal,
    }
}
