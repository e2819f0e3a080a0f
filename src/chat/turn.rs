//! One request/response exchange against the conversation log.
//!
//! The caller adds the user message first; the runners send the history and
//! record the assistant's answer.

use futures::StreamExt;

use crate::inference::cancel::CancellationGate;
use crate::inference::client::InferenceClient;
use crate::inference::errors::InferenceError;
use crate::inference::types::{ChatReply, ClassifiedEvent};

use super::conversation::Conversation;

/// How a streamed turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `done` arrived; the reply was appended to the conversation.
    Completed(ChatReply),
    /// `error` arrived; nothing was appended.
    Failed(String),
    /// The gate fired; nothing was appended.
    Cancelled,
}

/// Run a buffered turn.
///
/// On failure an `Error: …` assistant message is recorded so the log shows
/// what happened, and the error is returned as well.
pub async fn run_buffered_turn(
    client: &mut InferenceClient,
    conversation: &mut Conversation,
) -> Result<ChatReply, InferenceError> {
    match client.chat(conversation.messages()).await {
        Ok(reply) => {
            conversation.add_assistant(reply.content.clone(), reply.thinking.clone());
            Ok(reply)
        }
        Err(e) => {
            tracing::warn!(error = %e, "buffered turn failed");
            conversation.add_assistant(format!("Error: {e}"), None);
            Err(e)
        }
    }
}

/// Run a streamed turn, forwarding every event to `sink` as it arrives.
pub async fn run_streaming_turn<G, F>(
    client: &mut InferenceClient,
    conversation: &mut Conversation,
    gate: G,
    mut sink: F,
) -> TurnOutcome
where
    G: CancellationGate,
    F: FnMut(&ClassifiedEvent),
{
    let mut content = String::new();
    let mut thinking = String::new();

    let terminal = {
        let stream = client.chat_stream(conversation.messages(), gate).await;
        futures::pin_mut!(stream);

        let mut terminal = None;
        while let Some(event) = stream.next().await {
            sink(&event);
            let last = event.is_terminal();
            match event {
                ClassifiedEvent::Response { content: text } => content.push_str(&text),
                ClassifiedEvent::Thinking { content: text } => thinking.push_str(&text),
                ClassifiedEvent::Done => terminal = Some(Ok(())),
                ClassifiedEvent::Error { content: message } => terminal = Some(Err(message)),
            }
            if last {
                break;
            }
        }
        terminal
    };

    match terminal {
        Some(Ok(())) => {
            let reply = ChatReply {
                content: content.trim().to_string(),
                thinking: Some(thinking.trim().to_string()).filter(|t| !t.is_empty()),
            };
            conversation.add_assistant(reply.content.clone(), reply.thinking.clone());
            tracing::info!(
                content_len = reply.content.len(),
                thinking_len = thinking.len(),
                "streamed turn complete"
            );
            TurnOutcome::Completed(reply)
        }
        Some(Err(message)) => TurnOutcome::Failed(message),
        None => {
            tracing::info!(partial_len = content.len(), "streamed turn cancelled");
            TurnOutcome::Cancelled
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
