use anyhow::Result;
use async_trait::async_trait;

/// Asks the operator a yes/no question.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Returns true only for an affirmative answer. Empty input is "no".
    async fn confirm(&self, question: &str) -> Result<bool>;
}

/// Reads answers from the controlling terminal.
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn confirm(&self, question: &str) -> Result<bool> {
        let question = question.to_string();

        // stdin reads block; keep them off the runtime so Ctrl+C is still seen.
        tokio::task::spawn_blocking(move || {
            use std::io::{Write, stdin, stdout};

            print!("{} [y/N] ", question);
            stdout().flush()?;

            let mut input = String::new();
            stdin().read_line(&mut input)?;

            Ok(is_affirmative(&input))
        })
        .await?
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
