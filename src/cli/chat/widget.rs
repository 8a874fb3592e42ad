use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::transcript::{Sender, Transcript};
use crate::chat_client::ChatEndpoint;

#[cfg(test)]
use super::transcript::Message;

/// Shown in place of a reply whenever delivery fails.
pub const FALLBACK_MESSAGE: &str = "Sorry, something went wrong.";

/// User actions that submit the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The send control was pressed.
    Click,
    /// Enter was pressed while the input had focus.
    Enter,
}

/// The line the user is composing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputField {
    value: String,
}

impl InputField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }
}

/// Wires user triggers to the chat endpoint and renders both sides of the
/// exchange into the transcript.
pub struct ChatWidget {
    transcript: Arc<Mutex<Transcript>>,
    endpoint: Arc<dyn ChatEndpoint>,
}

impl ChatWidget {
    pub fn new(transcript: Transcript, endpoint: Arc<dyn ChatEndpoint>) -> Self {
        Self {
            transcript: Arc::new(Mutex::new(transcript)),
            endpoint,
        }
    }

    pub fn trigger(&self, trigger: Trigger, input: &mut InputField) -> Option<JoinHandle<()>> {
        debug!(?trigger, "Submitting input");
        self.send(input)
    }

    /// Point the transcript at a new sink. Bubbles already rendered stay
    /// where they were written.
    pub fn set_output(&self, output: Box<dyn Write + Send>) {
        lock(&self.transcript).set_output(output);
    }

    /// Send the trimmed input.
    ///
    /// Blank input is ignored. Otherwise the user bubble is rendered and the
    /// field cleared before this returns; the reply is rendered by the
    /// returned task once the endpoint answers. Replies to overlapping sends
    /// land in the order they arrive.
    pub fn send(&self, input: &mut InputField) -> Option<JoinHandle<()>> {
        let message = trim_input(input.value()).to_string();
        if message.is_empty() {
            return None;
        }

        render(&self.transcript, &message, Sender::User);
        input.clear();

        let transcript = Arc::clone(&self.transcript);
        let endpoint = Arc::clone(&self.endpoint);

        Some(tokio::spawn(async move {
            let reply = match endpoint.send(&message).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Error: {}", e);
                    FALLBACK_MESSAGE.to_string()
                }
            };
            render(&transcript, &reply, Sender::Bot);
        }))
    }

    #[cfg(test)]
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.transcript).messages().to_vec()
    }
}

/// Trim the way a browser text field's `trim()` does, which also drops a
/// byte-order mark.
fn trim_input(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
}

fn lock(transcript: &Mutex<Transcript>) -> std::sync::MutexGuard<'_, Transcript> {
    transcript.lock().unwrap_or_else(PoisonError::into_inner)
}

fn render(transcript: &Mutex<Transcript>, text: &str, sender: Sender) {
    let mut transcript = lock(transcript);
    if let Err(e) = transcript.add_message(text, sender) {
        warn!("Failed to write message to terminal: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;
    use url::Url;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::chat_client::{ChatClient, DeliveryFailure};
    use crate::cli::chat::transcript::tests::SharedBuffer;

    /// Answers every message with the same outcome and counts the calls.
    struct Canned {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn replying(reply: &'static str) -> Arc<Self> {
            Arc::new(Self { reply: Some(reply), calls: AtomicUsize::new(0) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: None, calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatEndpoint for Canned {
        async fn send(&self, _message: &str) -> Result<String, DeliveryFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(reply) => Ok(reply.to_string()),
                None => Err(DeliveryFailure::Status { status: 503, body: String::new() }),
            }
        }
    }

    /// Holds each reply back until the test releases it.
    #[derive(Default)]
    struct Gated {
        gates: Mutex<HashMap<String, Arc<Notify>>>,
    }

    impl Gated {
        fn gate(&self, message: &str) -> Arc<Notify> {
            let mut gates = self.gates.lock().unwrap();
            Arc::clone(gates.entry(message.to_string()).or_default())
        }
    }

    #[async_trait]
    impl ChatEndpoint for Gated {
        async fn send(&self, message: &str) -> Result<String, DeliveryFailure> {
            self.gate(message).notified().await;
            Ok(format!("re: {message}"))
        }
    }

    fn widget(endpoint: Arc<dyn ChatEndpoint>) -> ChatWidget {
        ChatWidget::new(Transcript::new(Box::new(io::sink())), endpoint)
    }

    fn input(text: &str) -> InputField {
        let mut field = InputField::new();
        field.set_value(text);
        field
    }

    fn texts(widget: &ChatWidget, sender: Sender) -> Vec<String> {
        widget
            .messages()
            .into_iter()
            .filter(|m| m.sender == sender)
            .map(|m| m.text)
            .collect()
    }

    #[tokio::test]
    async fn blank_input_does_nothing() {
        let endpoint = Canned::replying("unused");
        let widget = widget(endpoint.clone());

        for text in ["", " ", "\t\n  "] {
            let mut field = input(text);
            assert!(widget.trigger(Trigger::Enter, &mut field).is_none());
            assert!(widget.trigger(Trigger::Click, &mut field).is_none());
        }

        assert!(widget.messages().is_empty());
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn byte_order_mark_counts_as_blank() {
        let endpoint = Canned::replying("unused");
        let widget = widget(endpoint.clone());

        let mut field = input("\u{feff}");
        assert!(widget.trigger(Trigger::Click, &mut field).is_none());

        assert!(widget.messages().is_empty());
        assert_eq!(endpoint.calls(), 0);
    }

    #[test]
    fn trim_input_strips_unicode_space_and_bom() {
        assert_eq!(trim_input("\u{feff} Hi there\u{a0}\n"), "Hi there");
        assert_eq!(trim_input("a b"), "a b");
    }

    #[tokio::test]
    async fn replies_follow_a_redirected_sink() {
        let endpoint = Arc::new(Gated::default());
        let before = SharedBuffer::default();
        let after = SharedBuffer::default();
        let widget = ChatWidget::new(Transcript::new(Box::new(before.clone())), endpoint.clone());

        let pending = widget.send(&mut input("hi")).unwrap();
        widget.set_output(Box::new(after.clone()));
        endpoint.gate("hi").notify_one();
        pending.await.unwrap();

        assert!(before.contents().contains("hi"));
        assert!(!before.contents().contains("re: hi"));
        assert!(after.contents().contains("re: hi"));
    }

    #[tokio::test]
    async fn user_bubble_and_cleared_field_precede_the_reply() {
        let endpoint = Arc::new(Gated::default());
        let widget = widget(endpoint.clone());
        let mut field = input("  Hi there  ");

        let pending = widget.trigger(Trigger::Click, &mut field).unwrap();

        assert_eq!(field.value(), "");
        assert_eq!(widget.messages(), vec![Message { text: "Hi there".into(), sender: Sender::User }]);

        endpoint.gate("Hi there").notify_one();
        pending.await.unwrap();

        assert_eq!(texts(&widget, Sender::Bot), vec!["re: Hi there"]);
    }

    #[tokio::test]
    async fn successful_reply_renders_one_bot_bubble() {
        let endpoint = Canned::replying("Hello!");
        let widget = widget(endpoint.clone());
        let mut field = input("hi");

        widget.trigger(Trigger::Enter, &mut field).unwrap().await.unwrap();

        assert_eq!(texts(&widget, Sender::User), vec!["hi"]);
        assert_eq!(texts(&widget, Sender::Bot), vec!["Hello!"]);
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_renders_fallback() {
        let endpoint = Canned::failing();
        let widget = widget(endpoint.clone());
        let mut field = input("hi");

        let pending = widget.trigger(Trigger::Click, &mut field).unwrap();
        assert!(pending.await.is_ok());

        assert_eq!(field.value(), "");
        assert_eq!(texts(&widget, Sender::Bot), vec![FALLBACK_MESSAGE]);
    }

    #[tokio::test]
    async fn overlapping_replies_land_in_arrival_order() {
        let endpoint = Arc::new(Gated::default());
        let widget = widget(endpoint.clone());

        let first = widget.send(&mut input("first")).unwrap();
        let second = widget.send(&mut input("second")).unwrap();

        endpoint.gate("second").notify_one();
        second.await.unwrap();
        endpoint.gate("first").notify_one();
        first.await.unwrap();

        let texts: Vec<String> = widget.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first", "second", "re: second", "re: first"]);
    }

    #[tokio::test]
    async fn relays_trimmed_message_over_http() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_string(r#"{"message":"Hi there"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "reply": "Hello!" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&Url::parse(&server.uri()).unwrap()).unwrap();
        let buffer = SharedBuffer::default();
        let widget = ChatWidget::new(Transcript::new(Box::new(buffer.clone())), Arc::new(client));
        let mut field = input("  Hi there  ");

        widget.trigger(Trigger::Enter, &mut field).unwrap().await.unwrap();

        assert_eq!(texts(&widget, Sender::User), vec!["Hi there"]);
        assert_eq!(texts(&widget, Sender::Bot), vec!["Hello!"]);
        let out = buffer.contents();
        assert!(out.contains("Hi there"));
        assert!(out.contains("Hello!"));
    }

    #[tokio::test]
    async fn http_failure_renders_fallback() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = ChatClient::new(&Url::parse(&server.uri()).unwrap()).unwrap();
        let widget = widget(Arc::new(client));

        widget.send(&mut input("hi")).unwrap().await.unwrap();

        assert_eq!(texts(&widget, Sender::Bot), vec![FALLBACK_MESSAGE]);
    }
}
