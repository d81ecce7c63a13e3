// src/shell/mod.rs - Interactive command shell over the peripheral registries
pub mod commands;
pub mod history;
pub mod parser;

use crate::error::PeripheralError;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use thiserror::Error;

pub use commands::Dispatcher;
pub use history::History;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Unknown command '{0}'. Type 'help' for a list of commands")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No snapshot saved under '{0}'")]
    UnknownSnapshot(String),
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),
}

const PROMPT: &str = "mcu> ";

/// Outcome of feeding one line to the shell.
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    Output(String),
    Error(String),
    Exit,
}

/// Line-oriented front end: history, built-ins and error reporting around a
/// [`Dispatcher`].
pub struct Shell {
    dispatcher: Arc<Dispatcher>,
    history: History,
}

impl Shell {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            history: History::default(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineOutcome::Output(String::new());
        }
        self.history.push(trimmed);

        match parser::tokenize(trimmed).first().map(String::as_str) {
            Some("exit") | Some("quit") => return LineOutcome::Exit,
            Some("history") => {
                let listing = self
                    .history
                    .entries()
                    .enumerate()
                    .map(|(i, entry)| format!("{:>4}  {}", i + 1, entry))
                    .collect::<Vec<_>>()
                    .join("\n");
                return LineOutcome::Output(listing);
            }
            _ => {}
        }

        match self.dispatcher.execute(trimmed) {
            Ok(output) => LineOutcome::Output(output),
            Err(e) => {
                tracing::debug!("Command '{}' failed: {}", trimmed, e);
                LineOutcome::Error(e.to_string())
            }
        }
    }

    /// Read commands until EOF or `exit`.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        writeln!(
            output,
            "Emulating '{}'. Type 'help' for a list of commands.",
            self.dispatcher.profile().name
        )?;
        write!(output, "{}", PROMPT)?;
        output.flush()?;

        for line in input.lines() {
            match self.handle_line(&line?) {
                LineOutcome::Exit => break,
                LineOutcome::Output(text) if text.is_empty() => {}
                LineOutcome::Output(text) => writeln!(output, "{}", text)?,
                LineOutcome::Error(message) => writeln!(output, "Error: {}", message)?,
            }
            write!(output, "{}", PROMPT)?;
            output.flush()?;
        }
        writeln!(output)?;
        Ok(())
    }
}
