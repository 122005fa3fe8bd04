//! CLI surface, grounded on the teacher's `server/src/args.rs` `clap::Parser`/`Subcommand` split.

use uuid::Uuid;

#[derive(clap::Parser)]
#[command(name = "wire-sdk", about = "Sample launcher for the Wire app SDK")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Default, clap::Subcommand)]
pub enum Command {
    /// Start the SDK and print every decoded message as it arrives (default).
    #[default]
    Listen,
    /// Create a group conversation and print its id.
    CreateGroup {
        /// Conversation name.
        #[arg(long)]
        name: Option<String>,
        /// Qualified ids ("<uuid>@<domain>") of users to invite.
        #[arg(long = "user", value_parser = parse_qualified_id)]
        users: Vec<(Uuid, String)>,
    },
    /// Send a text message into an existing conversation, then exit.
    Send {
        #[arg(long, value_parser = parse_qualified_id)]
        conversation: (Uuid, String),
        #[arg(long)]
        text: String,
    },
}

fn parse_qualified_id(s: &str) -> Result<(Uuid, String), String> {
    let (id, domain) = s
        .split_once('@')
        .ok_or_else(|| format!("expected `<uuid>@<domain>`, got `{s}`"))?;
    let id = Uuid::parse_str(id).map_err(|e| e.to_string())?;
    Ok((id, domain.to_string()))
}
