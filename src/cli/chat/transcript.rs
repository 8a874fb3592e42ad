use std::io::{self, Write};

use crossterm::style::Stylize;
use tracing::debug;

/// Who a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    /// Sender-specific class carried by every bubble from this sender.
    pub fn class(self) -> &'static str {
        match self {
            Sender::User => "user-message",
            Sender::Bot => "bot-message",
        }
    }
}

/// One rendered bubble. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
}

impl Message {
    pub fn classes(&self) -> [&'static str; 2] {
        ["message", self.sender.class()]
    }
}

/// Append-only log of the conversation, mirrored to an output sink.
pub struct Transcript {
    messages: Vec<Message>,
    output: Box<dyn Write + Send>,
}

impl Transcript {
    pub fn new(output: Box<dyn Write + Send>) -> Self {
        Self {
            messages: Vec::new(),
            output,
        }
    }

    /// Record a bubble, write it to the sink and flush so the newest entry
    /// is visible.
    ///
    /// The message is recorded even if writing to the sink fails.
    pub fn add_message(&mut self, text: &str, sender: Sender) -> io::Result<()> {
        let message = Message {
            text: text.to_string(),
            sender,
        };
        debug!(classes = ?message.classes(), "Rendering message");

        let label = match sender {
            Sender::User => "you ›".cyan().bold(),
            Sender::Bot => "bot ›".green().bold(),
        };
        let shown = plain_text(&message.text);
        self.messages.push(message);

        writeln!(self.output, "{} {}", label, shown)?;
        self.output.flush()
    }

    /// Replace the sink that later bubbles are written to.
    pub fn set_output(&mut self, output: Box<dyn Write + Send>) {
        self.output = output;
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

/// Show text as text: control characters other than newline and tab are
/// printed in escaped form instead of reaching the terminal.
fn plain_text(text: &str) -> String {
    let mut shown = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_control() && c != '\n' && c != '\t' {
            shown.extend(c.escape_default());
        } else {
            shown.push(c);
        }
    }
    shown
}
