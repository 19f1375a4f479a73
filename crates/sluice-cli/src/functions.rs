//! Built-in apply functions

use sluice_core::{ApplyArgs, FunctionRegistry, Message};
use tracing::info;

/// Function errors
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("Message {topic}[{partition}]@{offset} has no payload")]
    MissingPayload { topic: String, partition: i32, offset: i64 },
}

fn payload_text(message: &Message) -> String {
    message
        .payload
        .as_deref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}

fn no_op(_message: &Message, _args: &ApplyArgs) -> anyhow::Result<()> {
    Ok(())
}

fn log_message(message: &Message, _args: &ApplyArgs) -> anyhow::Result<()> {
    info!(
        topic = %message.topic,
        partition = message.partition,
        offset = message.offset,
        "{}",
        payload_text(message)
    );
    Ok(())
}

/// Print each payload to stdout, with an optional `prefix` kwarg
fn print_payload(message: &Message, args: &ApplyArgs) -> anyhow::Result<()> {
    let prefix = args.kwarg_str("prefix").unwrap_or("");
    println!("{}{}", prefix, payload_text(message));
    Ok(())
}

fn require_payload(message: &Message, _args: &ApplyArgs) -> anyhow::Result<()> {
    if message.payload.is_none() {
        return Err(FunctionError::MissingPayload {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        }
        .into());
    }
    Ok(())
}

fn log_batch(batch: &[Message], _args: &ApplyArgs) -> anyhow::Result<()> {
    let first = batch.first().map(|m| m.offset).unwrap_or_default();
    let last = batch.last().map(|m| m.offset).unwrap_or_default();
    info!("Batch of {} messages, offsets {}..={}", batch.len(), first, last);
    Ok(())
}

/// Registry holding the built-in functions
pub fn builtin_registry() -> FunctionRegistry<Message> {
    let mut registry = FunctionRegistry::new();
    registry
        .register_message("sluice.no_op", no_op)
        .register_message("sluice.log_message", log_message)
        .register_message("sluice.print_payload", print_payload)
        .register_message("sluice.require_payload", require_payload)
        .register_batch("sluice.log_batch", log_batch);
    registry
}
