//! Telegram master channel.
//!
//! Bridges one Telegram bot to the slave channels registered with a
//! [`etm_channels::Coordinator`]. The bot is driven by [`session::BotSession`],
//! messages flow through [`router::Router`], and links are managed through
//! [`commands::ControlSurface`]. Telegram itself is reached through the
//! [`transport::Transport`] port; [`teloxide_transport::TeloxideTransport`]
//! implements it over the Bot API.

pub mod commands;
pub mod config;
pub mod counter;
pub mod dedupe;
pub mod error;
pub mod handlers;
pub mod html;
pub mod plugin;
pub mod router;
pub mod session;
pub mod teloxide_transport;
pub mod tracker;
pub mod transport;

#[cfg(test)]
mod testing;

pub use {
    commands::{Command, CommandOutcome, ControlSurface, parse_command},
    config::MasterConfig,
    error::{Error, Result},
    plugin::{MasterStores, TelegramMaster},
    router::{DeliveryResult, DropReason, Router},
    session::{BotSession, ErrorClass, ErrorHandler, ErrorOrigin, SessionState, UpdateHandler},
    teloxide_transport::TeloxideTransport,
    transport::{Transport, TransportError},
};
