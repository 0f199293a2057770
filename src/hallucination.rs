//! Hallucination checking: the self-correction loop applied to fact
//! verification.
//!
//! The draft turn extracts atomic claims with one search query each, the
//! tool turn runs those searches, and the revise turn classifies every
//! claim as verified or hallucinated. The verdict is structured output from
//! the start, so [`AnalysisResult::extract`] only decodes it.

use crate::agent::{Generator, StepError};
use crate::message::{Conversation, Role};
use crate::policy::{FINAL_ANALYSIS_MARKER, FinalMarker, TrailingRounds};
use crate::runner::Runner;
use crate::schema::{FinalAnalysis, OutputSchema, parse};
use crate::state::Task;
use crate::tools::ToolExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// How sure the analysis is that the text is accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
    Certain,
}

impl Confidence {
    /// Bucket the hallucination ratio `h = hallucinated / (hallucinated +
    /// verified)`. Upper bounds are exclusive: 0.2 is `Medium`, 0.5 is `Low`.
    /// No facts at all is `Low`.
    pub fn from_counts(verified: usize, hallucinated: usize) -> Self {
        let total = verified + hallucinated;
        if total == 0 {
            Self::Low
        } else if hallucinated == 0 {
            Self::Certain
        } else if hallucinated * 5 < total {
            Self::High
        } else if hallucinated * 2 < total {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Same buckets for a precomputed ratio. Non-finite ratios are `Low`.
    pub fn from_ratio(h: f64) -> Self {
        if !h.is_finite() || h >= 0.5 {
            Self::Low
        } else if h <= 0.0 {
            Self::Certain
        } else if h < 0.2 {
            Self::High
        } else {
            Self::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Certain => "Certain",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed verdict of a hallucination check. Derived once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub is_hallucination: bool,
    pub confidence: Confidence,
    pub queries_used: Vec<String>,
    pub sources: Vec<String>,
    pub verified_facts: Vec<String>,
    pub hallucinated_facts: Vec<String>,
}

impl AnalysisResult {
    pub fn from_analysis(analysis: FinalAnalysis, conversation: &Conversation) -> Self {
        let confidence = Confidence::from_counts(
            analysis.verified_facts.len(),
            analysis.hallucinated_facts.len(),
        );
        Self {
            is_hallucination: !analysis.hallucinated_facts.is_empty(),
            confidence,
            queries_used: conversation.queries_used(),
            sources: analysis.sources,
            verified_facts: analysis.verified_facts,
            hallucinated_facts: analysis.hallucinated_facts,
        }
    }

    /// Decode the latest final analysis in `conversation`.
    ///
    /// Looks at assistant turns carrying a `FinalAnalysis` call or the
    /// final-analysis marker, newest first, and takes the first that
    /// decodes. Without one (the bound hit first, or the run was cancelled)
    /// the result is empty with `Low` confidence and lists whatever sources
    /// the searches surfaced.
    pub fn extract(conversation: &Conversation) -> Self {
        let final_call = OutputSchema::FinalAnalysis.tool_name();
        let decoded = conversation
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .filter(|m| {
                m.tool_calls.iter().any(|c| Some(c.name.as_str()) == final_call)
                    || m.content.contains(FINAL_ANALYSIS_MARKER)
            })
            .find_map(|m| parse::<FinalAnalysis>(m).ok());

        match decoded {
            Some(analysis) => Self::from_analysis(analysis, conversation),
            None => Self {
                is_hallucination: false,
                confidence: Confidence::Low,
                queries_used: conversation.queries_used(),
                sources: conversation.surfaced_urls(),
                verified_facts: Vec::new(),
                hallucinated_facts: Vec::new(),
            },
        }
    }
}

/// The request handed to the actor for a piece of text.
pub fn check_prompt(text: &str) -> String {
    format!(
        "Analyze the following text for hallucinations:\n\n{text}\n\n\
         Extract each factual claim, verify it against web search results, \
         and classify it as verified or hallucinated."
    )
}

/// Runs [`Task::HallucinationCheck`] and hands back the typed verdict.
pub struct HallucinationChecker {
    runner: Runner,
}

impl HallucinationChecker {
    /// Terminates on the final analysis, or after the default round bound.
    pub fn new(generator: impl Generator + 'static, tools: ToolExecutor) -> Self {
        Self {
            runner: Runner::new(generator, tools)
                .with_policy(FinalMarker::new(TrailingRounds::default())),
        }
    }

    /// Use a fully configured runner (policy, checkpoint, hooks).
    pub fn with_runner(runner: Runner) -> Self {
        Self { runner }
    }

    pub fn check(&mut self, text: &str) -> Result<AnalysisResult, StepError> {
        let outcome = self.runner.run(Task::HallucinationCheck, check_prompt(text))?;
        let result = match outcome.state.terminal_result {
            Some(result) => result,
            None => AnalysisResult::extract(&outcome.state.conversation),
        };
        info!(
            is_hallucination = result.is_hallucination,
            confidence = %result.confidence,
            verified = result.verified_facts.len(),
            hallucinated = result.hallucinated_facts.len(),
            stop = ?outcome.stop,
            "hallucination check finished"
        );
        Ok(result)
    }
}
