// src/notify/registry.rs
use std::sync::Arc;

use crate::config::{options_as, SinkConfig};
use crate::notify::discord::{DiscordOptions, DiscordSink};
use crate::notify::email::{EmailOptions, EmailSink};
use crate::notify::log::LogSink;
use crate::notify::slack::{SlackOptions, SlackSink};
use crate::notify::telegram::{TelegramOptions, TelegramSink};
use crate::notify::transmission::{TransmissionOptions, TransmissionSink};
use crate::notify::NotificationSink;
use crate::registry::Registry;

pub type SinkRegistry = Registry<SinkConfig, dyn NotificationSink>;

/// Registry with every sink shipped in this crate.
pub fn builtin_sinks() -> SinkRegistry {
    let mut reg = SinkRegistry::empty("sink");
    reg.register("telegram", |cfg: &SinkConfig| {
        let opts: TelegramOptions = options_as(&cfg.options)?;
        Ok(Arc::new(TelegramSink::new(opts)?) as Arc<dyn NotificationSink>)
    });
    reg.register("discord", |cfg: &SinkConfig| {
        let opts: DiscordOptions = options_as(&cfg.options)?;
        Ok(Arc::new(DiscordSink::new(opts)) as Arc<dyn NotificationSink>)
    });
    reg.register("slack", |cfg: &SinkConfig| {
        let opts: SlackOptions = options_as(&cfg.options)?;
        Ok(Arc::new(SlackSink::new(opts)) as Arc<dyn NotificationSink>)
    });
    reg.register("email", |cfg: &SinkConfig| {
        let opts: EmailOptions = options_as(&cfg.options)?;
        Ok(Arc::new(EmailSink::new(opts)?) as Arc<dyn NotificationSink>)
    });
    reg.register("transmission", |cfg: &SinkConfig| {
        let opts: TransmissionOptions = options_as(&cfg.options)?;
        Ok(Arc::new(TransmissionSink::new(opts)) as Arc<dyn NotificationSink>)
    });
    reg.register("log", |_cfg: &SinkConfig| {
        Ok(Arc::new(LogSink) as Arc<dyn NotificationSink>)
    });
    reg
}
