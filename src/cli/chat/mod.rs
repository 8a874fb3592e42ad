pub mod printer;
pub mod transcript;
pub mod widget;

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use color_print::cstr;
use eyre::Result;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use printer::PrinterSink;
pub use transcript::Transcript;
pub use widget::{ChatWidget, InputField, Trigger};

const PROMPT: &str = "> ";

/// How long replies still in flight get to land after the session ends.
const REPLY_GRACE: Duration = Duration::from_secs(3);

const WELCOME_TEXT: &str = cstr!("
<bold>Hi, I'm the chat widget.</bold> Type a message and press Enter to send it.

/help         Show the help dialogue
/quit         Quit the application
");

const HELP_TEXT: &str = cstr!("
<bold>Chat widget</bold>

Every line you enter is sent to the chat endpoint and the reply is
printed above the prompt. Replies may arrive while you are typing.

/help         Show this help dialogue
/quit         Quit the application
");

pub struct ChatContext {
    output: Box<dyn Write + Send>,
    input: Option<String>,
    widget: ChatWidget,
}

impl ChatContext {
    pub fn new(output: Box<dyn Write + Send>, input: Option<String>, widget: ChatWidget) -> Self {
        Self {
            output,
            input,
            widget,
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        // Single-shot: press send once and wait for the reply.
        if let Some(input) = self.input.take() {
            let mut field = InputField::new();
            field.set_value(input);

            match self.widget.trigger(Trigger::Click, &mut field) {
                Some(pending) => pending.await?,
                None => debug!("Ignoring blank input"),
            }
            return Ok(ExitCode::SUCCESS);
        }

        self.print_welcome()?;
        self.run_interactive().await?;

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = editor()?;
        let mut field = InputField::new();
        let mut pending = Vec::new();

        match rl.create_external_printer() {
            Ok(printer) => self.widget.set_output(Box::new(PrinterSink::new(printer))),
            Err(e) => warn!("Replies will print over the prompt: {}", e),
        }

        loop {
            // readline blocks; hand this worker's queued replies to another thread.
            let readline = tokio::task::block_in_place(|| rl.readline(PROMPT));

            match readline {
                Ok(line) => {
                    match line.trim() {
                        "/quit" => break,
                        "/help" => {
                            writeln!(self.output, "{}", HELP_TEXT)?;
                            continue;
                        }
                        "" => continue,
                        _ => {}
                    }

                    rl.add_history_entry(line.as_str());

                    field.set_value(line);
                    reap_finished(&mut pending).await;
                    pending.extend(self.widget.trigger(Trigger::Enter, &mut field));
                }
                Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        info!("Ending chat session");

        // The editor no longer drains its printer once readline returns.
        self.widget.set_output(Box::new(io::stdout()));
        settle(pending, REPLY_GRACE).await;

        Ok(())
    }
}

fn editor() -> rustyline::Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .build();
    Editor::with_config(config)
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Reply task failed: {}", e);
    }
}

/// Collect reply tasks that already finished, logging any that panicked.
async fn reap_finished(pending: &mut Vec<JoinHandle<()>>) {
    let (done, running): (Vec<_>, Vec<_>) = pending.drain(..).partition(|h| h.is_finished());
    *pending = running;
    for handle in done {
        log_join(handle.await);
    }
}

/// Wait up to `grace` for outstanding replies, then abandon the rest.
async fn settle(pending: Vec<JoinHandle<()>>, grace: Duration) {
    if pending.is_empty() {
        return;
    }
    debug!("Waiting for {} outstanding replies", pending.len());

    let drain = async {
        for handle in pending {
            log_join(handle.await);
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("Gave up on replies still in flight after {:?}", grace);
    }
}
