use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

/// Line reader shared by the chat loop and the operator prompt, so answers typed (or piped) in
/// come out of the same buffer as chat input.
pub type SharedLines<R> = Arc<tokio::sync::Mutex<Lines<R>>>;

pub fn shared_lines<R>(reader: R) -> SharedLines<R>
where
    R: AsyncBufRead + Unpin,
{
    Arc::new(tokio::sync::Mutex::new(reader.lines()))
}

/// Source of operator answers for interactive scoring.
#[async_trait]
pub trait ScorePrompt: Send + Sync {
    /// Shows `question` and returns the raw answer line.
    async fn ask(&self, question: &str) -> Result<String>;

    /// Shows a message that needs no answer, such as a re-ask reason.
    async fn notify(&self, _message: &str) {}
}

/// Writes questions to `output` and takes each answer as the next line of the shared input.
pub struct LineScorePrompt<R, W> {
    lines: SharedLines<R>,
    output: tokio::sync::Mutex<W>,
}

impl<R, W> LineScorePrompt<R, W> {
    pub fn new(lines: SharedLines<R>, output: W) -> Self {
        Self { lines, output: tokio::sync::Mutex::new(output) }
    }
}

#[async_trait]
impl<R, W> ScorePrompt for LineScorePrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn ask(&self, question: &str) -> Result<String> {
        {
            let mut output = self.output.lock().await;
            output.write_all(format!("{question} ").as_bytes()).await?;
            output.flush().await?;
        }

        let line = self.lines.lock().await.next_line().await.context("failed to read answer")?;
        line.map(|line| line.trim().to_string())
            .ok_or_else(|| anyhow!("input closed while waiting for an answer"))
    }

    async fn notify(&self, message: &str) {
        let mut output = self.output.lock().await;
        let _ = output.write_all(format!("{message}\n").as_bytes()).await;
        let _ = output.flush().await;
    }
}

/// Replays canned answers in order and records every question it was asked.
#[derive(Debug, Default)]
pub struct ScriptedScorePrompt {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedScorePrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().map(|questions| questions.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().map(|answers| answers.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ScorePrompt for ScriptedScorePrompt {
    async fn ask(&self, question: &str) -> Result<String> {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(question.to_string());
        }
        self.answers
            .lock()
            .map_err(|_| anyhow!("scripted answers are poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted answer left for `{question}`"))
    }
}
