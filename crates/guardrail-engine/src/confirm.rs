use crate::types::RiskAssessment;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Human confirmation surface for risky operations. The engine never
/// reads stdin itself; callers plug in whatever UI they have.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str, assessment: &RiskAssessment) -> bool;
}

/// Approves everything. For pre-authorized batch runs.
#[derive(Debug, Default)]
pub struct AutoApproveConfirmer;

#[async_trait]
impl Confirmer for AutoApproveConfirmer {
    async fn confirm(&self, _prompt: &str, _assessment: &RiskAssessment) -> bool {
        true
    }
}

/// Declines everything. For dry runs and tests.
#[derive(Debug, Default)]
pub struct DenyConfirmer;

#[async_trait]
impl Confirmer for DenyConfirmer {
    async fn confirm(&self, _prompt: &str, _assessment: &RiskAssessment) -> bool {
        false
    }
}

/// Pops scripted answers in FIFO order; an empty queue declines. Test
/// double for exercising the controller's confirmation edges.
#[derive(Default)]
pub struct QueueConfirmer {
    answers: Mutex<VecDeque<bool>>,
}

impl QueueConfirmer {
    pub fn with_answers<I>(answers: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
        }
    }

    pub fn push_answer(&self, answer: bool) {
        self.answers
            .lock()
            .expect("queue confirmer mutex should lock")
            .push_back(answer);
    }
}

#[async_trait]
impl Confirmer for QueueConfirmer {
    async fn confirm(&self, _prompt: &str, _assessment: &RiskAssessment) -> bool {
        self.answers
            .lock()
            .expect("queue confirmer mutex should lock")
            .pop_front()
            .unwrap_or(false)
    }
}

pub struct CallbackConfirmer {
    callback: Arc<dyn Fn(&str, &RiskAssessment) -> bool + Send + Sync>,
}

impl CallbackConfirmer {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &RiskAssessment) -> bool + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl Confirmer for CallbackConfirmer {
    async fn confirm(&self, prompt: &str, assessment: &RiskAssessment) -> bool {
        (self.callback)(prompt, assessment)
    }
}

/// Prompts on the terminal with the risk factors listed; anything but an
/// explicit yes declines.
#[derive(Debug, Default)]
pub struct ConsoleConfirmer;

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, prompt: &str, assessment: &RiskAssessment) -> bool {
        let prompt = prompt.to_string();
        let assessment = assessment.clone();
        tokio::task::spawn_blocking(move || ask_console(&prompt, &assessment))
            .await
            .unwrap_or(false)
    }
}

fn ask_console(prompt: &str, assessment: &RiskAssessment) -> bool {
    eprintln!(
        "[?] {} (risk: {}, score {})",
        prompt,
        assessment.level.as_str(),
        assessment.score
    );
    for factor in &assessment.factors {
        eprintln!("    - {factor}");
    }
    let Some(raw) = read_line("[y/N]: ") else {
        return false;
    };
    matches!(raw.to_ascii_lowercase().as_str(), "y" | "yes")
}

fn read_line(prompt: &str) -> Option<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}").ok()?;
    stdout.flush().ok()?;

    let mut raw = String::new();
    io::stdin().read_line(&mut raw).ok()?;
    Some(raw.trim().to_string())
}
