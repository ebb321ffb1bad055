// Event bus subscribers that deliver fired items to Discord.
//
// The engine knows nothing about Discord; these subscribers are registered
// at startup and do all the platform-side work: pinging users for fired
// reminders, posting case embeds to the configured modlog channel, and
// unwinding timed actions when their case expires.

use crate::core::modlog::{CaseAction, CaseEvent, ModlogCase};
use crate::core::reminders::ReminderEvent;
use crate::core::schedule::Subscriber;
use crate::discord::commands::Modlog;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Pings the reminder's author in the originating channel.
pub struct ReminderNotifier {
    http: Arc<serenity::Http>,
}

impl ReminderNotifier {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Subscriber<ReminderEvent> for ReminderNotifier {
    async fn handle(&self, event: &ReminderEvent) -> anyhow::Result<()> {
        let ReminderEvent::Fire(reminder) = event;

        let content = format!(
            "<@{}> Reminder from <t:{}:R>: {}",
            reminder.user_id,
            reminder.created_at.timestamp(),
            reminder.text
        );
        let message = serenity::CreateMessage::new()
            .content(content)
            .allowed_mentions(
                serenity::CreateAllowedMentions::new()
                    .users(vec![serenity::UserId::new(reminder.user_id)]),
            );

        let channel = serenity::ChannelId::new(reminder.channel_id);
        if let Err(err) = channel.send_message(&self.http, message).await {
            // The destination channel may be gone; drop the ping.
            tracing::warn!(
                reminder_id = reminder.id,
                channel_id = reminder.channel_id,
                error = %err,
                "dropping reminder notification"
            );
        }
        Ok(())
    }
}

/// Posts case embeds to the guild's configured modlog channel.
pub struct ModlogNotifier {
    http: Arc<serenity::Http>,
    modlog: Arc<Modlog>,
}

impl ModlogNotifier {
    pub fn new(http: Arc<serenity::Http>, modlog: Arc<Modlog>) -> Self {
        Self { http, modlog }
    }
}

#[async_trait]
impl Subscriber<CaseEvent> for ModlogNotifier {
    async fn handle(&self, event: &CaseEvent) -> anyhow::Result<()> {
        let (case, verb) = match event {
            CaseEvent::Opened(case) => (case, "opened"),
            CaseEvent::Edited(case) => (case, "updated"),
            CaseEvent::Expired(case) => (case, "expired"),
        };

        let Some(config) = self.modlog.get_config(case.guild_id).await? else {
            return Ok(());
        };
        if !config.enabled {
            return Ok(());
        }
        let Some(channel_id) = config.channel_id else {
            return Ok(());
        };

        let embed = build_case_embed(case, verb);
        let send = serenity::ChannelId::new(channel_id)
            .send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await;

        if let Err(err) = send {
            if channel_is_gone(&err) {
                tracing::warn!(
                    guild_id = case.guild_id,
                    channel_id,
                    "modlog channel missing or forbidden, clearing configuration"
                );
                self.modlog.clear_config(case.guild_id).await?;
                return Ok(());
            }
            return Err(err.into());
        }
        Ok(())
    }
}

fn channel_is_gone(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)) => {
            let status = response.status_code.as_u16();
            status == 403 || status == 404
        }
        _ => false,
    }
}

fn build_case_embed(case: &ModlogCase, verb: &str) -> serenity::CreateEmbed {
    let color = match case.action {
        CaseAction::Ban | CaseAction::Kick => 0xED4245,
        CaseAction::Mute => 0xFEE75C,
        CaseAction::Unban | CaseAction::Unmute => 0x57F287,
        CaseAction::BulkDelete => 0x5865F2,
    };

    let mut embed = serenity::CreateEmbed::new()
        .title(format!("Case #{} | {} {}", case.id, case.action, verb))
        .color(color)
        .field("Moderator", format!("<@{}>", case.user_id), true)
        .field("Target", format!("<@{}>", case.target_id), true)
        .timestamp(serenity::Timestamp::now());

    if let Some(reason) = &case.reason {
        embed = embed.field("Reason", reason.clone(), false);
    }
    if let Some(expires_at) = case.expires_at {
        if case.active {
            embed = embed.field("Expires", format!("<t:{}:R>", expires_at.timestamp()), false);
        }
    }
    embed
}

/// Unwinds the platform side of a timed case when it expires: lifts the
/// ban for Ban cases, clears the timeout for Mute cases.
pub struct CaseExpiryActions {
    http: Arc<serenity::Http>,
}

impl CaseExpiryActions {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Subscriber<CaseEvent> for CaseExpiryActions {
    async fn handle(&self, event: &CaseEvent) -> anyhow::Result<()> {
        let CaseEvent::Expired(case) = event else {
            return Ok(());
        };

        let guild = serenity::GuildId::new(case.guild_id);
        let target = serenity::UserId::new(case.target_id);

        match case.action {
            CaseAction::Ban => {
                guild.unban(&self.http, target).await?;
                tracing::info!(case_id = case.id, guild_id = case.guild_id, target_id = case.target_id, "timed ban lifted");
            }
            CaseAction::Mute => {
                guild
                    .edit_member(
                        &self.http,
                        target,
                        serenity::EditMember::new().enable_communication(),
                    )
                    .await?;
                tracing::info!(case_id = case.id, guild_id = case.guild_id, target_id = case.target_id, "timed mute lifted");
            }
            _ => {}
        }
        Ok(())
    }
}
