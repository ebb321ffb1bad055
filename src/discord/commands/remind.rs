// Discord commands for reminders.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::core::reminders::ReminderError;
use crate::discord::commands::{Context, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Set a reminder. The bot will ping you in this channel after the time passes.
///
/// **Examples:**
/// - `/remind message:"Take a break" time:"30 minutes"`
/// - `/remind message:"Check the oven" time:"1 hour"`
/// - `/remind message:"Meeting tomorrow" time:"1 day"`
#[poise::command(slash_command)]
pub async fn remind(
    ctx: Context<'_>,
    #[description = "What to remind you about"] message: String,
    #[description = "When to remind you (e.g. '30 minutes', '2 hours', '1 day')"] time: Option<
        String,
    >,
) -> Result<(), Error> {
    let duration = match &time {
        Some(time_str) => match parse_duration(time_str) {
            Some(duration) => duration,
            None => {
                ctx.say(
                    "Invalid time format. Use formats like:\n\
                    - `30 seconds` or `30s`\n\
                    - `5 minutes` or `5m`\n\
                    - `2 hours` or `2h`\n\
                    - `1 day` or `1d`",
                )
                .await?;
                return Ok(());
            }
        },
        // Default to 1 minute if no time specified
        None => std::time::Duration::from_secs(60),
    };

    let when = Utc::now() + chrono::Duration::seconds(duration.as_secs() as i64);
    let time_display = format_duration(duration);

    let created = ctx
        .data()
        .reminders
        .create(
            ctx.author().id.get(),
            ctx.channel_id().get(),
            ctx.guild_id().map(|id| id.get()),
            &message,
            when,
        )
        .await;

    match created {
        Ok(reminder) => {
            ctx.say(format!(
                "Reminder `#{}` set! I'll ping you in {} with: \"{}\"",
                reminder.id, time_display, reminder.text
            ))
            .await?;
        }
        Err(ReminderError::Storage(err)) => {
            tracing::error!(error = %err, "failed to store reminder");
            ctx.say("Couldn't save your reminder, please try again.")
                .await?;
        }
        Err(err) => {
            ctx.say(err.to_string()).await?;
        }
    }

    Ok(())
}

/// Manage your pending reminders.
#[poise::command(slash_command, subcommands("list", "cancel", "clear"))]
pub async fn reminders(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// List your pending reminders.
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let reminders = ctx
        .data()
        .reminders
        .list(ctx.author().id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    if reminders.is_empty() {
        ctx.say("You have no pending reminders.").await?;
        return Ok(());
    }

    let lines: Vec<String> = reminders
        .iter()
        .map(|r| format!("`#{}` <t:{}:R> - {}", r.id, r.expires_at.timestamp(), r.text))
        .collect();

    let embed = serenity::CreateEmbed::new()
        .title("Your reminders")
        .description(lines.join("\n"))
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Cancel one of your reminders by id.
#[poise::command(slash_command)]
pub async fn cancel(
    ctx: Context<'_>,
    #[description = "The reminder id shown by /reminders list"] id: i64,
) -> Result<(), Error> {
    let cancelled = ctx
        .data()
        .reminders
        .cancel(ctx.author().id.get(), id)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    if cancelled {
        ctx.say(format!("Reminder `#{id}` cancelled.")).await?;
    } else {
        ctx.say(format!("No pending reminder `#{id}` found for you."))
            .await?;
    }
    Ok(())
}

/// Cancel all of your pending reminders.
#[poise::command(slash_command)]
pub async fn clear(ctx: Context<'_>) -> Result<(), Error> {
    let count = ctx
        .data()
        .reminders
        .cancel_all(ctx.author().id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    if count == 0 {
        ctx.say("You had no pending reminders.").await?;
    } else {
        ctx.say(format!("Cancelled {count} reminder(s).")).await?;
    }
    Ok(())
}

/// Parse a duration string like "30 minutes", "2h", "1 day" into a Duration.
pub fn parse_duration(input: &str) -> Option<std::time::Duration> {
    let input = input.trim().to_lowercase();

    // Try to parse formats like "30m", "2h", "1d", "45s"
    if let Some(duration) = parse_compact_format(&input) {
        return Some(duration);
    }

    // Try to parse formats like "30 minutes", "2 hours", "1 day"
    if let Some(duration) = parse_verbose_format(&input) {
        return Some(duration);
    }

    None
}

/// Parse compact formats like "30m", "2h", "1d", "45s"
fn parse_compact_format(input: &str) -> Option<std::time::Duration> {
    let input = input.trim();

    let (num_str, multiplier) = if input.ends_with('s') && !input.ends_with("seconds") {
        let num_part = input.trim_end_matches('s').trim();
        if num_part.chars().all(|c| c.is_ascii_digit()) {
            (num_part, 1u64)
        } else {
            return None;
        }
    } else if input.ends_with('m') && !input.ends_with("minutes") {
        (input.trim_end_matches('m').trim(), 60)
    } else if input.ends_with('h') {
        (input.trim_end_matches('h').trim(), 3600)
    } else if input.ends_with('d') {
        (input.trim_end_matches('d').trim(), 86400)
    } else if input.ends_with('w') {
        (input.trim_end_matches('w').trim(), 604800)
    } else {
        return None;
    };

    let number: u64 = num_str.parse().ok()?;
    Some(std::time::Duration::from_secs(number * multiplier))
}

/// Parse verbose formats like "30 minutes", "2 hours", "1 day"
fn parse_verbose_format(input: &str) -> Option<std::time::Duration> {
    let parts: Vec<&str> = input.split_whitespace().collect();

    if parts.len() != 2 {
        return None;
    }

    let number: u64 = parts[0].parse().ok()?;
    let unit = parts[1];

    let multiplier = match unit {
        "second" | "seconds" | "sec" | "secs" => 1,
        "minute" | "minutes" | "min" | "mins" => 60,
        "hour" | "hours" | "hr" | "hrs" => 3600,
        "day" | "days" => 86400,
        "week" | "weeks" => 604800,
        _ => return None,
    };

    Some(std::time::Duration::from_secs(number * multiplier))
}

/// Format a Duration into a human-readable string
pub fn format_duration(duration: std::time::Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs < 60 {
        format!(
            "{} second{}",
            total_secs,
            if total_secs == 1 { "" } else { "s" }
        )
    } else if total_secs < 3600 {
        let mins = total_secs / 60;
        format!("{} minute{}", mins, if mins == 1 { "" } else { "s" })
    } else if total_secs < 86400 {
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        if mins > 0 {
            format!(
                "{} hour{} and {} minute{}",
                hours,
                if hours == 1 { "" } else { "s" },
                mins,
                if mins == 1 { "" } else { "s" }
            )
        } else {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        }
    } else {
        let days = total_secs / 86400;
        let hours = (total_secs % 86400) / 3600;
        if hours > 0 {
            format!(
                "{} day{} and {} hour{}",
                days,
                if days == 1 { "" } else { "s" },
                hours,
                if hours == 1 { "" } else { "s" }
            )
        } else {
            format!("{} day{}", days, if days == 1 { "" } else { "s" })
        }
    }
}
