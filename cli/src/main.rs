//! Sample launcher: wires the SDK crates together against a configured backend and either prints
//! decoded messages as they arrive, or runs one conversation-management command and exits.
//!
//! Grounded on the teacher's `server/src/main.rs` shape (`init_logging()`, then
//! `get_configuration(...)`, then dispatch on a parsed `clap::Parser` command) adapted from a
//! long-running server bind to a long-running SDK client.

mod args;

use anyhow::Context;
use clap::Parser;
use uuid::Uuid;
use wire_sdk_common::identifiers::QualifiedId;
use wire_sdk_common::{MessageHeader, WireMessage};
use wire_sdk_core::{config, handlers::MessageHandlers, logging, Sdk};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = args::Args::parse();
    let settings = config::get_configuration("cli/").context("could not load configuration")?;
    logging::init_logging(&settings.application.log);

    let handlers = MessageHandlers::new().with_blocking_on_message(|message| {
        print_message(&message);
    });

    let sdk = Sdk::start(settings, handlers).await.context("failed to start the SDK")?;

    match args.cmd.unwrap_or_default() {
        args::Command::Listen => {
            tracing::info!("wire-sdk is listening, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
        }
        args::Command::CreateGroup { name, users } => {
            let user_ids = users.into_iter().map(|(id, domain)| QualifiedId::new(id, domain)).collect::<Vec<_>>();
            let conversation_id =
                sdk.app_manager().create_group(name.as_deref(), &user_ids).await.context("failed to create group")?;
            println!("{conversation_id}");
        }
        args::Command::Send { conversation: (id, domain), text } => {
            let conversation_id = QualifiedId::new(id, domain);
            let message = WireMessage::Text {
                header: MessageHeader {
                    id: Uuid::new_v4(),
                    conversation_id,
                    sender: sdk.self_user_id().clone(),
                    timestamp: chrono::Utc::now(),
                },
                text,
                mentions: Vec::new(),
                quoted_message_id: None,
            };
            let message_id = sdk.app_manager().send_message(&message).await.context("failed to send message")?;
            println!("{message_id}");
        }
    }

    sdk.close().await;
    Ok(())
}

fn print_message(message: &WireMessage) {
    match message {
        WireMessage::Text { header, text, .. } => {
            println!("[{}] {}: {}", header.conversation_id, header.sender, text);
        }
        WireMessage::Asset { header, metadata, .. } => {
            println!("[{}] {}: <asset {} ({} bytes)>", header.conversation_id, header.sender, metadata.mime_type, metadata.size);
        }
        WireMessage::Ignored | WireMessage::Unknown => {}
        other => {
            if let Some(header) = other.header() {
                println!("[{}] {}: <{:?}>", header.conversation_id, header.sender, other);
            }
        }
    }
}
