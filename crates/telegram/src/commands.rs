//! Control surface: `info`, `link`, `unlink`, `unlink_all`, and the extra
//! functions slave channels offer (`/extra`, `/h_<n>_<fn>`, `/<n>_<fn>`).
//!
//! Every operation takes the Telegram user id of the caller and refuses to
//! run for anyone outside the configured admin list. Outcomes that are the
//! user's mistake (no match, bad pattern, policy conflict) come back as a
//! failed [`CommandOutcome`] rather than an error.

use std::{fmt::Write as _, sync::Arc};

use {
    etm_bindings::{BindingPolicy, BindingStore, ChatInfoStore, LinkMode},
    etm_channels::{Coordinator, ExtraFunction, SlaveChannel, SlaveChat},
    etm_common::ChatIdentifier,
    tracing::{info, warn},
};

use crate::error::{Error, Result};

/// Candidates listed when a pattern matches more than one chat.
const MAX_LISTED_MATCHES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    Link { pattern: String, mode: LinkMode },
    Unlink { slave: String },
    UnlinkAll,
    /// List extra functions of every slave.
    Extra,
    /// Usage of one extra function.
    ExtraUsage { module: usize, function: String },
    /// Run an extra function with the rest of the line as arguments.
    ExtraCall {
        module: usize,
        function: String,
        args: String,
    },
}

/// Parse a Telegram bot command. `/cmd@other_bot` addressed to a different
/// bot is not ours and yields `None`.
#[must_use]
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(h, a)| (h, a.trim()));
    let (name, addressee) = match head.split_once('@') {
        Some((name, bot)) => (name, Some(bot)),
        None => (head, None),
    };
    if let (Some(addressee), Some(ours)) = (addressee, bot_username)
        && !addressee.eq_ignore_ascii_case(ours)
    {
        return None;
    }

    let name = name.to_ascii_lowercase();
    match name.as_str() {
        "info" => Some(Command::Info),
        "link" => {
            let (mode, pattern) = match args.strip_prefix("--replace") {
                Some(pattern) => (LinkMode::Replace, pattern.trim()),
                None => (LinkMode::Strict, args),
            };
            Some(Command::Link {
                pattern: pattern.to_string(),
                mode,
            })
        },
        "unlink" => Some(Command::Unlink {
            slave: args.to_string(),
        }),
        "unlink_all" => Some(Command::UnlinkAll),
        "extra" => Some(Command::Extra),
        other => {
            if let Some(usage) = other.strip_prefix("h_") {
                let (module, function) = parse_extra(usage)?;
                Some(Command::ExtraUsage { module, function })
            } else {
                let (module, function) = parse_extra(other)?;
                Some(Command::ExtraCall {
                    module,
                    function,
                    args: args.to_string(),
                })
            }
        },
    }
}

/// `<n>_<function>`, the address of an extra function.
fn parse_extra(name: &str) -> Option<(usize, String)> {
    let (module, function) = name.split_once('_')?;
    if module.is_empty() || !module.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let module = module.parse().ok()?;
    ExtraFunction::is_valid_id(function).then(|| (module, function.to_string()))
}

/// Result of a control operation plus a summary for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub ok: bool,
    pub summary: String,
}

impl CommandOutcome {
    fn success(summary: impl Into<String>) -> Self {
        Self {
            ok: true,
            summary: summary.into(),
        }
    }

    fn failure(summary: impl Into<String>) -> Self {
        Self {
            ok: false,
            summary: summary.into(),
        }
    }
}

pub struct ControlSurface {
    bindings: Arc<dyn BindingStore>,
    chat_info: Arc<dyn ChatInfoStore>,
    coordinator: Arc<Coordinator>,
    admins: Vec<i64>,
}

impl ControlSurface {
    pub fn new(
        bindings: Arc<dyn BindingStore>,
        chat_info: Arc<dyn ChatInfoStore>,
        coordinator: Arc<Coordinator>,
        admins: Vec<i64>,
    ) -> Self {
        Self {
            bindings,
            chat_info,
            coordinator,
            admins,
        }
    }

    fn authorize(&self, caller: i64) -> Result<()> {
        if self.admins.contains(&caller) {
            Ok(())
        } else {
            warn!(user_id = caller, "control command from non-admin refused");
            Err(Error::PermissionDenied { user_id: caller })
        }
    }

    pub async fn execute(
        &self,
        caller: i64,
        master: &ChatIdentifier,
        command: Command,
    ) -> Result<CommandOutcome> {
        match command {
            Command::Info => self.info(caller, master).await,
            Command::Link { pattern, mode } => self.link(caller, master, &pattern, mode).await,
            Command::Unlink { slave } => self.unlink(caller, &slave).await,
            Command::UnlinkAll => self.unlink_all(caller, master).await,
            Command::Extra => self.extra(caller),
            Command::ExtraUsage { module, function } => self.extra_usage(caller, module, &function),
            Command::ExtraCall {
                module,
                function,
                args,
            } => self.extra_call(caller, module, &function, &args).await,
        }
    }

    /// Links of `master`, then the registered slaves and middlewares.
    pub async fn info(&self, caller: i64, master: &ChatIdentifier) -> Result<CommandOutcome> {
        self.authorize(caller)?;

        let mut summary = String::new();
        let links = self.bindings.lookup_by_master(master).await?;
        if links.is_empty() {
            let _ = writeln!(summary, "{master} is not linked to any remote chat.");
        } else {
            let _ = writeln!(summary, "{master} is linked to:");
            for link in &links {
                let name = self.chat_name(&link.slave_uid).await?;
                let _ = writeln!(summary, "- {name} ({})", link.slave_uid);
            }
        }
        if self.bindings.policy() == BindingPolicy::Single {
            let _ = writeln!(summary, "Only one remote chat may be linked per Telegram chat.");
        }

        let slaves = self.coordinator.slaves();
        let _ = writeln!(summary, "\nSlave channels ({}):", slaves.len());
        for slave in &slaves {
            let _ = writeln!(
                summary,
                "- {} {} ({}, {})",
                slave.emoji, slave.name, slave.id, slave.version
            );
        }
        let middlewares = self.coordinator.middlewares();
        let _ = writeln!(summary, "\nMiddlewares ({}):", middlewares.len());
        for mw in middlewares {
            let _ = writeln!(summary, "- {} ({}, {})", mw.name, mw.id, mw.version);
        }

        Ok(CommandOutcome::success(summary.trim_end()))
    }

    async fn chat_name(&self, chat: &ChatIdentifier) -> Result<String> {
        Ok(self
            .chat_info
            .get(chat)
            .await?
            .map_or_else(|| chat.chat_uid().to_string(), |c| c.display_name().to_string()))
    }

    /// Link `master` to the single remote chat `pattern` resolves to: either
    /// the identifier of a known chat or a regex over known chat names.
    pub async fn link(
        &self,
        caller: i64,
        master: &ChatIdentifier,
        pattern: &str,
        mode: LinkMode,
    ) -> Result<CommandOutcome> {
        self.authorize(caller)?;

        if !master.is_master() {
            return Ok(CommandOutcome::failure(format!(
                "{master} is not a Telegram chat."
            )));
        }
        if pattern.is_empty() {
            return Ok(CommandOutcome::failure(
                "Usage: /link [--replace] <chat id or name pattern>",
            ));
        }

        let slave = match self.resolve_slave(pattern).await? {
            Ok(slave) => slave,
            Err(outcome) => return Ok(outcome),
        };

        match self.bindings.link(master, &slave, mode).await {
            Ok(binding) => {
                info!(caller, master = %binding.master_uid, slave = %binding.slave_uid, "chats linked");
                let name = self.chat_name(&slave).await?;
                Ok(CommandOutcome::success(format!(
                    "Linked {name} ({slave}) to {master}."
                )))
            },
            Err(etm_bindings::Error::PolicyViolation { existing, .. }) => {
                Ok(CommandOutcome::failure(format!(
                    "{master} is already linked to {existing}. Use /link --replace to swap it."
                )))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_slave(
        &self,
        pattern: &str,
    ) -> Result<std::result::Result<ChatIdentifier, CommandOutcome>> {
        if let Ok(exact) = pattern.parse::<ChatIdentifier>() {
            if exact.is_master() {
                return Ok(Err(CommandOutcome::failure(
                    "A Telegram chat cannot be linked to another Telegram chat.",
                )));
            }
            if self.coordinator.get(exact.channel_id()).is_some()
                || self.chat_info.get(&exact).await?.is_some()
            {
                return Ok(Ok(exact));
            }
        }

        let matches = match self.chat_info.search(pattern).await {
            Ok(matches) => matches,
            Err(etm_bindings::Error::InvalidPattern { source, .. }) => {
                return Ok(Err(CommandOutcome::failure(format!(
                    "Invalid pattern: {source}"
                ))));
            },
            Err(e) => return Err(e.into()),
        };

        match matches.as_slice() {
            [] => Ok(Err(CommandOutcome::failure(format!(
                "No remote chat matches {pattern:?}."
            )))),
            [only] => Ok(Ok(only.id.clone())),
            many => Ok(Err(CommandOutcome::failure(ambiguous(pattern, many)))),
        }
    }

    /// Remove the link of one remote chat. Unknown links are not an error.
    pub async fn unlink(&self, caller: i64, slave: &str) -> Result<CommandOutcome> {
        self.authorize(caller)?;

        let slave = match slave.parse::<ChatIdentifier>() {
            Ok(slave) => slave,
            Err(e) => {
                return Ok(CommandOutcome::failure(format!(
                    "Usage: /unlink <chat id>. {e}"
                )));
            },
        };
        if self.bindings.unlink(&slave).await? {
            info!(caller, %slave, "chat unlinked");
            Ok(CommandOutcome::success(format!("Unlinked {slave}.")))
        } else {
            Ok(CommandOutcome::success(format!("{slave} was not linked.")))
        }
    }

    pub async fn unlink_all(&self, caller: i64, master: &ChatIdentifier) -> Result<CommandOutcome> {
        self.authorize(caller)?;

        let removed = self.bindings.unlink_all(master).await?;
        info!(caller, %master, removed, "all links removed");
        Ok(CommandOutcome::success(format!(
            "Removed {removed} link(s) from {master}."
        )))
    }

    /// Extra functions of every slave, numbered for `/h_<n>_<fn>`.
    pub fn extra(&self, caller: i64) -> Result<CommandOutcome> {
        self.authorize(caller)?;

        let mut summary = String::from("Send the command next to a function for its usage.");
        for (module, slave) in self.coordinator.ordered_slaves().iter().enumerate() {
            let d = slave.descriptor();
            let _ = write!(summary, "\n\n{} {} ({})", d.emoji, d.name, d.id);
            let functions = slave.extra_functions();
            if functions.is_empty() {
                summary.push_str("\nNo extra functions.");
            }
            for function in &functions {
                let _ = write!(summary, "\n- {} /h_{module}_{}", function.name, function.id);
            }
        }
        Ok(CommandOutcome::success(summary))
    }

    pub fn extra_usage(&self, caller: i64, module: usize, function: &str) -> Result<CommandOutcome> {
        self.authorize(caller)?;

        let (slave, function) = match self.find_extra(module, function) {
            Ok(found) => found,
            Err(outcome) => return Ok(outcome),
        };
        let d = slave.descriptor();
        let command = format!("/{module}_{}", function.id);
        Ok(CommandOutcome::success(format!(
            "{} {} ({})\n\n{command} ({})\n{}",
            d.emoji,
            d.name,
            d.id,
            function.name,
            function.description.replace("{function_name}", &command)
        )))
    }

    /// Run an extra function. Failures inside the slave are reported to the
    /// caller, not raised.
    pub async fn extra_call(
        &self,
        caller: i64,
        module: usize,
        function: &str,
        args: &str,
    ) -> Result<CommandOutcome> {
        self.authorize(caller)?;

        let (slave, function) = match self.find_extra(module, function) {
            Ok(found) => found,
            Err(outcome) => return Ok(outcome),
        };
        let d = slave.descriptor();
        let header = format!("{} {}: {}\n-------\n", d.emoji, d.name, function.name);
        info!(caller, channel_id = %d.id, function = %function.id, "extra function called");
        match slave.call_extra(&function.id, args).await {
            Ok(result) => Ok(CommandOutcome::success(header + &result)),
            Err(e) => {
                warn!(channel_id = %d.id, function = %function.id, error = %e, "extra function failed");
                Ok(CommandOutcome::failure(header + &e.to_string()))
            },
        }
    }

    fn find_extra(
        &self,
        module: usize,
        function: &str,
    ) -> std::result::Result<(Arc<dyn SlaveChannel>, ExtraFunction), CommandOutcome> {
        let Some(slave) = self.coordinator.ordered_slaves().into_iter().nth(module) else {
            return Err(CommandOutcome::failure(format!(
                "There is no module {module}. Send /extra for the list."
            )));
        };
        let found = slave.extra_functions().into_iter().find(|f| f.id == function);
        match found {
            Some(found) => Ok((slave, found)),
            None => Err(CommandOutcome::failure(format!(
                "{} has no extra function {function}.",
                slave.descriptor().id
            ))),
        }
    }
}

fn ambiguous(pattern: &str, matches: &[SlaveChat]) -> String {
    let mut text = format!(
        "{} remote chats match {pattern:?}; be more specific:",
        matches.len()
    );
    for chat in matches.iter().take(MAX_LISTED_MATCHES) {
        let _ = write!(text, "\n- {} ({})", chat.display_name(), chat.id);
    }
    if matches.len() > MAX_LISTED_MATCHES {
        let _ = write!(text, "\n…and {} more", matches.len() - MAX_LISTED_MATCHES);
    }
    text
}
