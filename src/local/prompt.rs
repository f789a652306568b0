// Stepwright: Operator prompts (manual entry and acknowledgement dialogs)

use async_trait::async_trait;
use rustyline::error::ReadlineError;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};

#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask the operator for a value. `None` when no value can be obtained
    /// (cancelled, or nobody to ask).
    async fn manual_entry(&self, prompt: &str) -> Option<String>;

    /// Show `message` and return once the operator acknowledges it.
    async fn acknowledge(&self, title: &str, message: &str);
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

type LineSource = Box<dyn FnMut(&str) -> Option<String>>;

/// Builds the line source on the reader thread.
type SourceFactory = Box<dyn FnOnce() -> LineSource + Send>;

#[derive(Default)]
struct ReaderState {
    /// A read is in progress on the terminal.
    pending: bool,
}

/// Prompts on the controlling terminal.
///
/// One reader thread owns stdin. A prompt that gives up (an acknowledgement
/// that timed out) leaves its read in place, and the next prompt takes over
/// that read instead of starting a second one, so no typed line is lost.
pub struct ConsolePrompter {
    requests: std::sync::mpsc::Sender<String>,
    lines: Mutex<mpsc::UnboundedReceiver<Option<String>>>,
    state: Arc<StdMutex<ReaderState>>,
}

impl ConsolePrompter {
    pub fn new() -> Self {
        Self::with_reader(Box::new(|| -> LineSource {
            let mut editor = rustyline::DefaultEditor::new();
            Box::new(move |prompt: &str| match editor.as_mut() {
                Ok(rl) => read_line(rl, prompt),
                Err(e) => {
                    tracing::error!("Failed to initialize readline: {}", e);
                    None
                }
            })
        }))
    }

    fn with_reader(factory: SourceFactory) -> Self {
        let (requests, request_rx) = std::sync::mpsc::channel::<String>();
        let (line_tx, lines) = mpsc::unbounded_channel();
        let state = Arc::new(StdMutex::new(ReaderState::default()));

        let reader_state = state.clone();
        std::thread::spawn(move || {
            let mut source = factory();
            for prompt in request_rx {
                let line = source(&prompt);
                let mut state = lock(&reader_state);
                state.pending = false;
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self {
            requests,
            lines: Mutex::new(lines),
            state,
        }
    }

    async fn prompt_line(&self, prompt: String) -> Option<String> {
        let mut lines = self.lines.lock().await;
        {
            let mut state = lock(&self.state);
            // Lines finished after their prompt gave up belong to nobody.
            while lines.try_recv().is_ok() {}
            if state.pending {
                println!("{}", prompt);
            } else {
                if self.requests.send(prompt).is_err() {
                    return None;
                }
                state.pending = true;
            }
        }
        lines.recv().await.flatten()
    }
}

impl Default for ConsolePrompter {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &StdMutex<ReaderState>) -> std::sync::MutexGuard<'_, ReaderState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_line(rl: &mut rustyline::DefaultEditor, prompt: &str) -> Option<String> {
    match rl.readline(prompt) {
        Ok(line) => Some(line.trim().to_string()),
        Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => None,
        Err(e) => {
            tracing::warn!("Readline error: {}", e);
            None
        }
    }
}

#[async_trait]
impl Prompter for ConsolePrompter {
    async fn manual_entry(&self, prompt: &str) -> Option<String> {
        let line = self.prompt_line(format!("✍  {}: ", prompt)).await?;
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    async fn acknowledge(&self, title: &str, message: &str) {
        println!("\n┌─ {}\n│ {}\n└─", title, message);
        let _ = self.prompt_line("Press Enter to continue ".into()).await;
    }
}

// ---------------------------------------------------------------------------
// Headless
// ---------------------------------------------------------------------------

/// For runs with nobody at the keyboard: manual entry is unavailable and
/// dialogs dismiss themselves.
pub struct NonInteractivePrompter;

#[async_trait]
impl Prompter for NonInteractivePrompter {
    async fn manual_entry(&self, prompt: &str) -> Option<String> {
        tracing::warn!(prompt = %prompt, "Manual entry requested in non-interactive mode");
        None
    }

    async fn acknowledge(&self, title: &str, message: &str) {
        tracing::info!(title = %title, "{}", message);
    }
}
