use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::error::IdseqError;

/// The operator-facing seam: every blocking question and every printed notice goes through here.
pub trait Interaction: Send + Sync {
    fn confirm(&self, question: &str) -> Result<bool, IdseqError>;
    fn ask(&self, prompt: &str) -> Result<String, IdseqError>;
    fn notify(&self, message: &str);
}

/// Terminal prompts; notices go to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleInteraction;

impl Interaction for ConsoleInteraction {
    fn confirm(&self, question: &str) -> Result<bool, IdseqError> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt_text(question))
            .default(false)
            .interact()
            .map_err(prompt_error)
    }

    fn ask(&self, prompt: &str) -> Result<String, IdseqError> {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt_text(prompt))
            .allow_empty(true)
            .interact_text()
            .map(|answer| answer.trim().to_string())
            .map_err(prompt_error)
    }

    fn notify(&self, message: &str) {
        println!("{message}");
    }
}

/// The theme adds its own separator after the prompt.
fn prompt_text(prompt: &str) -> String {
    prompt.trim().trim_end_matches(':').trim_end().to_string()
}

fn prompt_error(err: dialoguer::Error) -> IdseqError {
    IdseqError::Prompt(err.to_string())
}

/// Accepts every confirmation; free-text questions cannot be answered.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAccept;

impl Interaction for AutoAccept {
    fn confirm(&self, _question: &str) -> Result<bool, IdseqError> {
        Ok(true)
    }

    fn ask(&self, prompt: &str) -> Result<String, IdseqError> {
        Err(IdseqError::Prompt(format!(
            "cannot answer \"{}\" in non-interactive mode",
            prompt.trim()
        )))
    }

    fn notify(&self, message: &str) {
        println!("{message}");
    }
}

/// An empty answer is an error.
pub fn required_input(interaction: &dyn Interaction, prompt: &str) -> Result<String, IdseqError> {
    let answer = interaction.ask(prompt)?;
    if answer.is_empty() {
        return Err(IdseqError::Prompt("Value required!".to_string()));
    }
    Ok(answer)
}
