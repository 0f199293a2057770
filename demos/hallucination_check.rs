// Hallucination check: extract claims, search for each, classify.
//
// Needs ANTHROPIC_API_KEY and EXA_API_KEY (a .env file works).
//
// Run: RUST_LOG=info cargo run --example hallucination_check -- "some text to verify"

use reflex_line::{Config, StepError};
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> Result<(), StepError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let text = std::env::args().nth(1).unwrap_or_else(|| {
        "The Eiffel Tower was built in 1887 and is located in Rome, Italy".to_string()
    });

    let config = Config::from_env()?;
    let mut checker = config.hallucination_checker()?;
    let result = checker.check(&text)?;

    println!("hallucination: {}", if result.is_hallucination { "yes" } else { "no" });
    println!("confidence:    {}", result.confidence);
    println!("verified:");
    for fact in &result.verified_facts {
        println!("  + {fact}");
    }
    println!("hallucinated:");
    for fact in &result.hallucinated_facts {
        println!("  - {fact}");
    }
    println!("queries: {:?}", result.queries_used);
    println!("sources: {:?}", result.sources);

    Ok(())
}
