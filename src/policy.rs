//! When to stop looping.
//!
//! The two bounding strategies seen in practice, counting the trailing run
//! of assistant/tool turns and capping the raw message count, are both
//! [`IterationPolicy`] implementations and can be swapped freely.
//! [`FinalMarker`] adds early termination on an explicit "done" signal.

use crate::message::{Conversation, Role};
use crate::schema::OutputSchema;

/// Default bound on draft/revise rounds.
pub const MAX_ITERATIONS: usize = 5;

/// Marker a free-text actor writes when its analysis is complete.
pub const FINAL_ANALYSIS_MARKER: &str = "FINAL ANALYSIS";

pub trait IterationPolicy: Send {
    /// True when the loop must not schedule another round.
    fn should_stop(&self, conversation: &Conversation) -> bool;
}

impl<P: IterationPolicy + ?Sized> IterationPolicy for Box<P> {
    fn should_stop(&self, conversation: &Conversation) -> bool {
        (**self).should_stop(conversation)
    }
}

/// Stop once the trailing run of assistant/tool messages exceeds `max`.
/// User turns end the run, so they never count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingRounds {
    pub max: usize,
}

impl Default for TrailingRounds {
    fn default() -> Self {
        Self {
            max: MAX_ITERATIONS,
        }
    }
}

impl IterationPolicy for TrailingRounds {
    fn should_stop(&self, conversation: &Conversation) -> bool {
        conversation.trailing_rounds() > self.max
    }
}

/// Stop once the conversation holds more than `max` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBudget {
    pub max: usize,
}

impl IterationPolicy for MessageBudget {
    fn should_stop(&self, conversation: &Conversation) -> bool {
        conversation.len() > self.max
    }
}

/// Stop as soon as the latest message is an assistant turn carrying the
/// final marker, either in its text or as a `FinalAnalysis` tool call that
/// asks for no further searches. Otherwise defer to `inner`.
#[derive(Debug, Clone)]
pub struct FinalMarker<P> {
    pub marker: String,
    pub inner: P,
}

impl<P: IterationPolicy> FinalMarker<P> {
    pub fn new(inner: P) -> Self {
        Self {
            marker: FINAL_ANALYSIS_MARKER.to_string(),
            inner,
        }
    }

    pub fn is_final(&self, conversation: &Conversation) -> bool {
        let Some(last) = conversation.last() else {
            return false;
        };
        if last.role != Role::Assistant {
            return false;
        }
        let final_call = OutputSchema::FinalAnalysis.tool_name();
        last.content.contains(&self.marker)
            || last
                .first_tool_call()
                .is_some_and(|c| Some(c.name.as_str()) == final_call && c.queries().is_empty())
    }
}

impl<P: IterationPolicy> IterationPolicy for FinalMarker<P> {
    fn should_stop(&self, conversation: &Conversation) -> bool {
        self.is_final(conversation) || self.inner.should_stop(conversation)
    }
}
