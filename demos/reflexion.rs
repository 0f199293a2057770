// Reflexion: draft an answer, critique it, research, revise with citations.
//
// Needs ANTHROPIC_API_KEY and EXA_API_KEY (a .env file works). The question
// defaults to the classic one; pass your own as the first argument.
//
// Run: RUST_LOG=info cargo run --example reflexion -- "Why is reflection useful in AI?"

use reflex_line::{Config, RevisedAnswer, StepError, StructuredAnswer, Task};
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> Result<(), StepError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Why is reflection useful in AI?".to_string());

    let config = Config::from_env()?;
    let mut runner = config.runner()?.with_tracing();
    let outcome = runner.run(Task::Reflexion, question)?;

    println!("stopped: {:?} after {} rounds\n", outcome.stop, outcome.state.iteration_count);

    if let Some(revised) = outcome.answer::<RevisedAnswer>() {
        println!("{}\n", revised.base.answer);
        for reference in &revised.references {
            println!("  {reference}");
        }
    } else if let Some(draft) = outcome.answer::<StructuredAnswer>() {
        println!("{}", draft.answer);
        println!("\nmissing: {}", draft.reflection.missing);
    }

    Ok(())
}
