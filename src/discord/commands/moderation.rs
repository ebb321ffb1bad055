// Moderation slash commands.
//
// Each command performs the platform action first and only then opens the
// modlog case, so a failed action never leaves a phantom case behind.

use crate::core::modlog::{CaseAction, ModlogError, OpenCase};
use crate::discord::commands::remind::{format_duration, parse_duration};
use crate::discord::commands::{Context, Error};
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;

/// Discord caps member timeouts at 28 days.
const MAX_TIMEOUT_SECS: u64 = 28 * 24 * 60 * 60;

fn expiry_from(duration: Option<std::time::Duration>) -> Option<DateTime<Utc>> {
    duration.map(|d| Utc::now() + chrono::Duration::seconds(d.as_secs() as i64))
}

async fn reply_invalid_duration(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Invalid duration. Use formats like `30 minutes`, `2h`, `7 days`.")
        .await?;
    Ok(())
}

/// Ban a member, optionally for a limited time.
#[poise::command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "How long (e.g. '7 days'); permanent if omitted"] duration: Option<String>,
    #[description = "Reason for the ban"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let duration = match duration.as_deref().map(parse_duration) {
        Some(None) => return reply_invalid_duration(ctx).await,
        Some(Some(duration)) => Some(duration),
        None => None,
    };

    guild_id
        .ban_with_reason(
            &ctx.serenity_context().http,
            user.id,
            0,
            reason.as_deref().unwrap_or("No reason provided"),
        )
        .await?;

    let case = ctx
        .data()
        .modlog
        .open(OpenCase {
            guild_id: guild_id.get(),
            action: CaseAction::Ban,
            moderator_id: ctx.author().id.get(),
            target_id: user.id.get(),
            reason: reason.clone(),
            expires_at: expiry_from(duration),
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    match duration {
        Some(duration) => {
            ctx.say(format!(
                "Banned {} for {} (case `#{}`). The ban lifts <t:{}:R>.",
                user.name,
                format_duration(duration),
                case.id,
                case.expires_at.map(|at| at.timestamp()).unwrap_or_default()
            ))
            .await?;
        }
        None => {
            ctx.say(format!("Banned {} (case `#{}`).", user.name, case.id))
                .await?;
        }
    }
    Ok(())
}

/// Lift a ban immediately.
#[poise::command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    guild_id.unban(&ctx.serenity_context().http, user.id).await?;

    // The gateway ban-removal event closes any timed ban cases; this case
    // only records who lifted the ban and why.
    let case = ctx
        .data()
        .modlog
        .open(OpenCase {
            guild_id: guild_id.get(),
            action: CaseAction::Unban,
            moderator_id: ctx.author().id.get(),
            target_id: user.id.get(),
            reason,
            expires_at: None,
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("Unbanned {} (case `#{}`).", user.name, case.id))
        .await?;
    Ok(())
}

/// Kick a member.
#[poise::command(slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
    #[description = "Reason for the kick"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    guild_id
        .kick_with_reason(
            &ctx.serenity_context().http,
            user.id,
            reason.as_deref().unwrap_or("No reason provided"),
        )
        .await?;

    let case = ctx
        .data()
        .modlog
        .open(OpenCase {
            guild_id: guild_id.get(),
            action: CaseAction::Kick,
            moderator_id: ctx.author().id.get(),
            target_id: user.id.get(),
            reason,
            expires_at: None,
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("Kicked {} (case `#{}`).", user.name, case.id))
        .await?;
    Ok(())
}

/// Time a member out.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "How long (e.g. '10 minutes', '1h')"] duration: String,
    #[description = "Reason for the mute"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let Some(duration) = parse_duration(&duration) else {
        return reply_invalid_duration(ctx).await;
    };
    if duration.as_secs() > MAX_TIMEOUT_SECS {
        ctx.say("Timeouts are limited to 28 days.").await?;
        return Ok(());
    }

    let expires_at = Utc::now() + chrono::Duration::seconds(duration.as_secs() as i64);
    let timestamp = serenity::Timestamp::from_unix_timestamp(expires_at.timestamp())?;
    guild_id
        .edit_member(
            &ctx.serenity_context().http,
            user.id,
            serenity::EditMember::new().disable_communication_until_datetime(timestamp),
        )
        .await?;

    let case = ctx
        .data()
        .modlog
        .open(OpenCase {
            guild_id: guild_id.get(),
            action: CaseAction::Mute,
            moderator_id: ctx.author().id.get(),
            target_id: user.id.get(),
            reason,
            expires_at: Some(expires_at),
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!(
        "Muted {} for {} (case `#{}`).",
        user.name,
        format_duration(duration),
        case.id
    ))
    .await?;
    Ok(())
}

/// Lift a member's timeout early.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    guild_id
        .edit_member(
            &ctx.serenity_context().http,
            user.id,
            serenity::EditMember::new().enable_communication(),
        )
        .await?;

    let case = ctx
        .data()
        .modlog
        .open(OpenCase {
            guild_id: guild_id.get(),
            action: CaseAction::Unmute,
            moderator_id: ctx.author().id.get(),
            target_id: user.id.get(),
            reason,
            expires_at: None,
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("Unmuted {} (case `#{}`).", user.name, case.id))
        .await?;
    Ok(())
}

/// Bulk-delete recent messages in this channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn purge(
    ctx: Context<'_>,
    #[description = "How many messages to delete (2-100)"]
    #[min = 2]
    #[max = 100]
    count: u8,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let http = &ctx.serenity_context().http;

    let messages = ctx
        .channel_id()
        .messages(http, serenity::GetMessages::new().limit(count))
        .await?;
    let ids: Vec<serenity::MessageId> = messages.iter().map(|m| m.id).collect();
    let deleted = ids.len();
    ctx.channel_id().delete_messages(http, ids).await?;

    let case = ctx
        .data()
        .modlog
        .open(OpenCase {
            guild_id: guild_id.get(),
            action: CaseAction::BulkDelete,
            moderator_id: ctx.author().id.get(),
            target_id: ctx.channel_id().get(),
            reason: Some(format!("Deleted {deleted} messages")),
            expires_at: None,
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("Deleted {deleted} messages (case `#{}`).", case.id))
        .await?;
    Ok(())
}

/// Expire a timed case ahead of its deadline (lifts the ban/mute now).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn expire(
    ctx: Context<'_>,
    #[description = "Case id"] case_id: i64,
) -> Result<(), Error> {
    match ctx.data().modlog.expire(case_id).await {
        Ok(case) => {
            ctx.say(format!("Case `#{}` ({}) expired.", case.id, case.action))
                .await?;
        }
        Err(ModlogError::NoSuchCase(_)) => {
            ctx.say(format!("No case `#{case_id}` found.")).await?;
        }
        Err(err) => return Err(Error::from(err.to_string())),
    }
    Ok(())
}

/// Update the reason on an existing case.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn reason(
    ctx: Context<'_>,
    #[description = "Case id"] case_id: i64,
    #[description = "New reason"] text: String,
) -> Result<(), Error> {
    match ctx.data().modlog.edit(case_id, &text).await {
        Ok(case) => {
            ctx.say(format!("Updated reason on case `#{}`.", case.id))
                .await?;
        }
        Err(ModlogError::NoSuchCase(_)) => {
            ctx.say(format!("No case `#{case_id}` found.")).await?;
        }
        Err(err) => return Err(Error::from(err.to_string())),
    }
    Ok(())
}
