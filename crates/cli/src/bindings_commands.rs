use std::sync::Arc;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    etm_bindings::{BindingStore, LinkMode},
    etm_channels::{Coordinator, DEFAULT_INBOX_CAPACITY},
    etm_common::ChatIdentifier,
    etm_config::EtmConfig,
    etm_telegram::{CommandOutcome, ControlSurface, MasterConfig, MasterStores},
    sqlx::SqlitePool,
};

#[derive(Subcommand)]
pub enum BindingsAction {
    /// List links, optionally only those of one Telegram chat.
    List {
        /// Telegram chat id or full chat identifier.
        #[arg(allow_hyphen_values = true)]
        master: Option<String>,
    },
    /// Link a Telegram chat to the remote chat matching a pattern.
    Link {
        /// Telegram chat id or full chat identifier.
        #[arg(allow_hyphen_values = true)]
        master: String,
        /// Remote chat identifier, or a regex over cached chat names.
        slave_pattern: String,
        /// Replace the existing link when only one link per chat is allowed.
        #[arg(long)]
        replace: bool,
    },
    /// Remove the link of a remote chat.
    Unlink { slave: String },
    /// Remove every link of a Telegram chat.
    UnlinkAll {
        #[arg(allow_hyphen_values = true)]
        master: String,
    },
}

/// Accepts a bare Telegram chat id (`-100123`) or a full identifier.
fn parse_master(input: &str) -> Result<ChatIdentifier> {
    if let Ok(chat_id) = input.parse::<i64>() {
        return Ok(ChatIdentifier::telegram(chat_id));
    }
    Ok(input.parse()?)
}

/// Runs with the first admin as caller, like a command sent from Telegram.
pub async fn handle_bindings(
    action: &BindingsAction,
    config: &EtmConfig,
    pool: SqlitePool,
) -> Result<()> {
    let master_config = MasterConfig::from(config);
    let stores = MasterStores::sqlite(pool, &master_config);
    // Offline: no slave channels are running, chats resolve from the cache.
    let (coordinator, _inbox) = Coordinator::new(DEFAULT_INBOX_CAPACITY);
    let control = ControlSurface::new(
        Arc::clone(&stores.bindings),
        Arc::clone(&stores.chat_info),
        Arc::new(coordinator),
        config.admins.clone(),
    );
    let caller = config.primary_admin();

    let outcome = match action {
        BindingsAction::List { master } => {
            return list(stores.bindings.as_ref(), master.as_deref()).await;
        },
        BindingsAction::Link {
            master,
            slave_pattern,
            replace,
        } => {
            let mode = if *replace {
                LinkMode::Replace
            } else {
                LinkMode::Strict
            };
            control
                .link(caller, &parse_master(master)?, slave_pattern, mode)
                .await?
        },
        BindingsAction::Unlink { slave } => control.unlink(caller, slave).await?,
        BindingsAction::UnlinkAll { master } => {
            control.unlink_all(caller, &parse_master(master)?).await?
        },
    };
    report(outcome)
}

fn report(outcome: CommandOutcome) -> Result<()> {
    if outcome.ok {
        println!("{}", outcome.summary);
        Ok(())
    } else {
        bail!(outcome.summary)
    }
}

async fn list(bindings: &dyn BindingStore, master: Option<&str>) -> Result<()> {
    let rows = match master {
        Some(master) => bindings.lookup_by_master(&parse_master(master)?).await?,
        None => bindings.list().await?,
    };
    if rows.is_empty() {
        println!("No links.");
        return Ok(());
    }
    for row in rows {
        println!("{}  ->  {}", row.master_uid, row.slave_uid);
    }
    Ok(())
}
