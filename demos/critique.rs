// Draft/critique loop: one model writes, a second persona grades and sends
// it back. Three drafts, two critiques.
//
// Needs ANTHROPIC_API_KEY (a .env file works).
//
// Run: RUST_LOG=debug cargo run --example critique

use reflex_line::{Config, CritiqueLoop, Role, StepError};
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> Result<(), StepError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let config = Config::from_env()?;
    let writer = config.generator()?.with_system(
        "You are an essay assistant tasked with writing excellent 5-paragraph essays. \
         If the user provides critique, respond with a revised version of your previous attempts.",
    );
    let grader = config.generator()?.with_system(
        "You are grading an essay submission. \
         Generate critique and recommendations for the user's submission.",
    );

    let mut critique = CritiqueLoop::new(writer, grader);
    let conversation =
        critique.run("Write an essay on why The Little Prince is relevant in modern childhood")?;

    for message in conversation.iter().skip(1) {
        let who = match message.role {
            Role::Assistant => "writer",
            _ => "grader",
        };
        println!("--- {who} ---\n{}\n", message.content);
    }

    Ok(())
}
