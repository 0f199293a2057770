use crate::agent::{Generator, StepError};
use crate::message::{Conversation, Message};
use crate::policy::{IterationPolicy, MessageBudget};
use crate::runner::CancelToken;
use crate::schema::OutputSchema;
use tracing::{debug, info};

/// Message budget of the draft/critique loop: three drafts, two critiques.
pub const DEFAULT_MESSAGE_BUDGET: usize = 4;

/// Two generators taking turns: the actor writes, the critic reviews.
///
/// The critic sees the conversation with user and assistant swapped, so its
/// own critiques read as its turns and the actor's drafts as requests. Each
/// critique goes back to the actor as a user message.
pub struct CritiqueLoop {
    actor: Box<dyn Generator>,
    critic: Box<dyn Generator>,
    policy: Box<dyn IterationPolicy>,
    max_rounds: usize,
    cancel: CancelToken,
}

impl CritiqueLoop {
    pub fn new(actor: impl Generator + 'static, critic: impl Generator + 'static) -> Self {
        Self {
            actor: Box::new(actor),
            critic: Box::new(critic),
            policy: Box::new(MessageBudget {
                max: DEFAULT_MESSAGE_BUDGET,
            }),
            max_rounds: 100,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl IterationPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Safety net for policies that never say stop.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run until the policy stops the loop after an actor turn. Returns the
    /// full exchange, ending in the actor's last draft unless cancelled.
    pub fn run(&mut self, request: impl Into<String>) -> Result<Conversation, StepError> {
        let mut conversation = Conversation::from_user(request);

        for round in 1..=self.max_rounds {
            if self.cancel.is_cancelled() {
                info!(round, "critique loop cancelled");
                return Ok(conversation);
            }

            let draft = self.actor.generate(&conversation, OutputSchema::FreeText)?;
            conversation.push(draft);
            debug!(round, messages = conversation.len(), "draft");

            if self.policy.should_stop(&conversation) {
                info!(rounds = round, messages = conversation.len(), "critique loop finished");
                return Ok(conversation);
            }

            let critique = self
                .critic
                .generate(&conversation.with_swapped_roles(), OutputSchema::FreeText)?;
            conversation.push(Message::user(critique.content));
            debug!(round, messages = conversation.len(), "critique");
        }

        Err(StepError::other(format!(
            "max_rounds ({}) exceeded in critique loop",
            self.max_rounds
        )))
    }
}
