//! The operator prompt seam.
//!
//! Filename curation is interactive and external to the engine: the engine
//! only needs `suggest a default, get a confirmed string back`. The prompt
//! device is serialized by construction, since a single stage task owns it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// One request to confirm a filename for one source file.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    /// Source basename being renamed, e.g. `audio001.wav`.
    pub source_name: String,

    /// The engine's guessed filename.
    pub guess: String,

    /// Editable default; the guess, or a previously provided name.
    pub default: String,

    /// 1-based attempt counter for this file.
    pub attempt: u32,

    /// Why the previous reply was rejected, if it was.
    pub rejection: Option<String>,
}

/// The operator's reply.
#[derive(Debug, Clone)]
pub struct PromptReply {
    pub name: String,

    /// Accept the name even if validation rejects it.
    pub force: bool,
}

impl PromptReply {
    /// Interpret a raw input line: a leading `!` forces acceptance and an
    /// empty line takes the offered default.
    pub fn parse(line: &str, default: &str) -> Self {
        let line = line.trim();
        match line.strip_prefix('!') {
            Some(rest) => Self {
                name: rest.trim().to_string(),
                force: true,
            },
            None if line.is_empty() => Self {
                name: default.to_string(),
                force: false,
            },
            None => Self {
                name: line.to_string(),
                force: false,
            },
        }
    }
}

/// The external prompt device.
#[async_trait]
pub trait FilenamePrompter: Send + Sync {
    async fn prompt(&self, request: &PromptRequest) -> Result<PromptReply>;
}

/// Line-oriented prompter over the process's own terminal.
pub struct TerminalPrompter {
    input: Mutex<BufReader<Stdin>>,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilenamePrompter for TerminalPrompter {
    async fn prompt(&self, request: &PromptRequest) -> Result<PromptReply> {
        if let Some(reason) = &request.rejection {
            println!("  rejected: {reason} (prefix with '!' to force)");
        }
        println!("* Confirm rename for {}", request.source_name);
        println!("  Guess: {} ({} chars)", request.guess, request.guess.len());
        println!("  Enter accepts: {}", request.default);
        print!("  Final> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let mut line = String::new();
        let n = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .context("failed to read from the terminal")?;
        if n == 0 {
            bail!("stdin closed while a filename prompt was pending");
        }
        Ok(PromptReply::parse(&line, &request.default))
    }
}

/// Prompter that replays canned answers; for tests and unattended runs.
pub struct ScriptedPrompter {
    answers: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    /// Answers are consumed in order; when they run out, every prompt
    /// accepts its default.
    pub fn new(answers: Vec<String>) -> Self {
        Self {
            answers: Mutex::new(answers),
        }
    }

    /// A prompter that always accepts the offered default.
    pub fn accept_defaults() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl FilenamePrompter for ScriptedPrompter {
    async fn prompt(&self, request: &PromptRequest) -> Result<PromptReply> {
        let mut answers = self.answers.lock().await;
        let line = if answers.is_empty() {
            String::new()
        } else {
            answers.remove(0)
        };
        Ok(PromptReply::parse(&line, &request.default))
    }
}
