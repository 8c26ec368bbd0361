//! Asking what to do when a branch cannot be fast-forwarded.

use std::io::{self, BufRead, Write};

/// Question asked when local commits diverge from the target.
pub const NON_FAST_FORWARD_PROMPT: &str =
    "Cannot fast-forward merge, attempt to rebase? (y)es / (q)uit / (s)kip : ";

/// A source of answers to interactive questions.
pub trait Prompter: Send + Sync {
    fn ask(&self, prompt: &str) -> String;
}

impl<F> Prompter for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn ask(&self, prompt: &str) -> String {
        self(prompt)
    }
}

/// Reads answers from the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&self, prompt: &str) -> String {
        print!("{prompt}");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            // EOF or an unreadable terminal: nobody can answer, so quit.
            Ok(0) | Err(_) => "q".to_string(),
            Ok(_) => line,
        }
    }
}

/// Gives the same answer to every question.
#[derive(Debug, Clone)]
pub struct FixedPrompter(pub String);

impl Prompter for FixedPrompter {
    fn ask(&self, _prompt: &str) -> String {
        self.0.clone()
    }
}

/// What to do with a branch that cannot be fast-forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Rebase,
    Skip,
    Quit,
}

impl ConflictChoice {
    /// Interpret an answer; `None` for anything unrecognised.
    pub fn parse(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Self::Rebase),
            "s" | "skip" => Some(Self::Skip),
            "q" | "quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Ask `prompter` until it gives a recognised answer.
///
/// `on_unrecognised` is told about every rejected answer.
pub fn resolve_conflict(
    prompter: &dyn Prompter,
    mut on_unrecognised: impl FnMut(&str),
) -> ConflictChoice {
    loop {
        let answer = prompter.ask(NON_FAST_FORWARD_PROMPT);
        match ConflictChoice::parse(&answer) {
            Some(choice) => return choice,
            None => on_unrecognised(answer.trim()),
        }
    }
}
