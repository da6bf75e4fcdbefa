use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    commands::{CommandOutcome, CommandService},
    domain::ListKind,
    engine::RawColor,
    infrastructure::files::write_atomic,
    settings::{ExportData, HideMode},
};

/// Username block/highlight list aggregator.
#[derive(Debug, Parser)]
#[command(name = "overmod", version, about, long_about = None)]
pub struct Cli {
    /// Settings profile to operate on.
    #[arg(long, global = true, env = "OVERMOD_PROFILE")]
    pub profile: Option<String>,

    /// Command to run once; without one the sync daemon starts.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every subscribed list now.
    Sync,
    /// Print the merged settings and verdict caches.
    State,
    /// Add a user to a writable list.
    Add {
        username: String,
        /// Public key of the writable list; optional when only one is configured.
        #[arg(long)]
        list: Option<String>,
    },
    /// Remove a user from a writable list.
    Remove {
        username: String,
        #[arg(long)]
        list: String,
    },
    /// Check a key pair against the server.
    VerifyKey {
        public_key: String,
        private_key: String,
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Create a list on the server and subscribe to it.
    CreateList {
        kind: ListKind,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Subscribe {
        public_key: String,
        #[arg(long)]
        kind: Option<ListKind>,
        #[arg(long)]
        name: Option<String>,
    },
    Unsubscribe {
        public_key: String,
    },
    /// Move a subscription to the position of another.
    Reorder {
        from: String,
        to: String,
    },
    /// Ignore transient block lists while enabled.
    TransientUnblock {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    ListTransient {
        public_key: String,
        #[arg(action = clap::ArgAction::Set)]
        transient: bool,
    },
    /// Set a list's highlight color (hex or {"bg":..,"fg":..}); omit to clear.
    Color {
        public_key: String,
        color: Option<String>,
    },
    Block {
        name: String,
    },
    Unblock {
        name: String,
    },
    Highlight {
        name: String,
    },
    Unhighlight {
        name: String,
    },
    RemoveWritable {
        public_key: String,
    },
    /// Set the list server; omit to reset to the default.
    ApiBase {
        url: Option<String>,
    },
    HideMode {
        mode: HideMode,
    },
    /// Flag or unflag a row for subtree highlighting.
    ToggleRow {
        row_id: String,
    },
    Export {
        /// Write to a file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import {
        path: PathBuf,
    },
}

/// Runs `command` and returns the serialized outcome and whether it succeeded.
pub async fn execute(command: Command, commands: &CommandService) -> Result<(bool, Value)> {
    match command {
        Command::Sync => render(commands.sync_now().await),
        Command::State => render(commands.state().await),
        Command::Add { username, list } => {
            render(commands.add_member(&username, list.as_deref()).await)
        }
        Command::Remove { username, list } => {
            render(commands.remove_member(&username, &list).await)
        }
        Command::VerifyKey {
            public_key,
            private_key,
            base_url,
        } => render(
            commands
                .verify_list_key(&public_key, &private_key, base_url.as_deref())
                .await,
        ),
        Command::CreateList {
            kind,
            name,
            description,
        } => render(
            commands
                .create_list(kind, name.as_deref(), description.as_deref())
                .await,
        ),
        Command::Subscribe {
            public_key,
            kind,
            name,
        } => render(commands.subscribe(&public_key, kind, name.as_deref()).await),
        Command::Unsubscribe { public_key } => render(commands.unsubscribe(&public_key).await),
        Command::Reorder { from, to } => render(commands.reorder_subscription(&from, &to).await),
        Command::TransientUnblock { enabled } => {
            render(commands.set_transient_unblock(enabled).await)
        }
        Command::ListTransient {
            public_key,
            transient,
        } => render(commands.set_list_transient(&public_key, transient).await),
        Command::Color { public_key, color } => {
            let raw = color.as_deref().map(parse_color);
            render(commands.set_highlight_color(&public_key, raw).await)
        }
        Command::Block { name } => render(commands.add_local_blocked(&name).await),
        Command::Unblock { name } => render(commands.remove_local_blocked(&name).await),
        Command::Highlight { name } => render(commands.add_highlighted_user(&name).await),
        Command::Unhighlight { name } => render(commands.remove_highlighted_user(&name).await),
        Command::RemoveWritable { public_key } => {
            render(commands.remove_writable(&public_key).await)
        }
        Command::ApiBase { url } => render(commands.set_api_base_url(url.as_deref()).await),
        Command::HideMode { mode } => render(commands.set_hide_mode(mode).await),
        Command::ToggleRow { row_id } => render(commands.toggle_row_highlight(&row_id).await),
        Command::Export { out } => match (out, commands.export().await) {
            (Some(path), CommandOutcome::Done(payload)) => {
                render(write_export(&path, &payload.data))
            }
            (_, outcome) => render(outcome),
        },
        Command::Import { path } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read import file {}", path.display()))?;
            render(commands.import(&text).await)
        }
    }
}

/// Object-shaped input is read as a `{bg, fg}` pair, anything else as a hex string.
fn parse_color(raw: &str) -> RawColor {
    let raw = raw.trim();
    if raw.starts_with('{') {
        if let Ok(color) = serde_json::from_str(raw) {
            return color;
        }
    }
    RawColor::Hex(raw.to_string())
}

/// A failed write is reported like any failed command.
fn write_export(path: &Path, data: &ExportData) -> CommandOutcome<Value> {
    let written = serde_json::to_vec_pretty(data)
        .map_err(anyhow::Error::from)
        .and_then(|body| write_atomic(path, &body));
    match written {
        Ok(()) => CommandOutcome::Done(json!({ "path": path })),
        Err(err) => {
            tracing::warn!(
                target: "settings",
                path = %path.display(),
                error = %err,
                "export write failed"
            );
            CommandOutcome::Failed(format!("{err:#}"))
        }
    }
}

fn render<T: Serialize>(outcome: CommandOutcome<T>) -> Result<(bool, Value)> {
    Ok((outcome.is_ok(), serde_json::to_value(&outcome)?))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        api::{testing::StubApi, ListApi},
        db::{memory_pool, settings::SettingsRepository},
        tasks::{retry::RetryPolicy, sync::SyncService},
    };

    async fn commands() -> CommandService {
        let store = SettingsRepository::new(memory_pool().await.unwrap());
        let api: Arc<dyn ListApi> = Arc::new(StubApi::default());
        let retry = RetryPolicy {
            retries: 0,
            delay: Duration::ZERO,
        };
        let sync = Arc::new(SyncService::new(
            store.clone(),
            api.clone(),
            retry,
            Duration::from_secs(3600),
        ));
        CommandService::new("p".into(), store, api, sync)
    }

    #[test]
    fn parses_typed_arguments() {
        let cli =
            Cli::try_parse_from(["overmod", "create-list", "highlight", "--name", "Pals"]).unwrap();
        match cli.command {
            Some(Command::CreateList { kind, name, .. }) => {
                assert_eq!(kind, ListKind::Highlight);
                assert_eq!(name.as_deref(), Some("Pals"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["overmod", "create-list", "moderate"]).is_err());
        assert!(Cli::try_parse_from(["overmod"]).unwrap().command.is_none());

        let cli = Cli::try_parse_from(["overmod", "block", "troll", "--profile", "work"]).unwrap();
        assert_eq!(cli.profile.as_deref(), Some("work"));

        let cli = Cli::try_parse_from(["overmod", "hide-mode", "collapse"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::HideMode {
                mode: HideMode::Collapse
            })
        ));
    }

    #[test]
    fn colors_accept_hex_or_pairs() {
        assert_eq!(parse_color(" #abc "), RawColor::Hex("#abc".into()));
        assert_eq!(
            parse_color(r##"{"bg":"#fff","fg":"#000"}"##),
            RawColor::Pair {
                bg: Some("#fff".into()),
                fg: Some("#000".into())
            }
        );
    }

    #[tokio::test]
    async fn export_write_failures_are_reported_as_failed_commands() {
        let dir = tempfile::tempdir().unwrap();
        let commands = commands().await;
        let missing = dir.path().join("missing").join("export.json");

        let (ok, output) = execute(Command::Export { out: Some(missing) }, &commands)
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(output["ok"], false);
        assert!(output["error"]
            .as_str()
            .unwrap()
            .contains("failed to create temp file"));

        let target = dir.path().join("export.json");
        let (ok, output) = execute(Command::Export { out: Some(target.clone()) }, &commands)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(output, json!({ "ok": true, "path": target }));
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(written["version"], 2);
    }
}
