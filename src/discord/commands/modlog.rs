// Modlog configuration commands.

use crate::discord::commands::{Context, Error};
use poise::serenity_prelude as serenity;

/// Modlog configuration.
///
/// Choose where moderation cases are posted.
#[poise::command(
    slash_command,
    subcommands("channel", "disable", "recent"),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn modlog(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Post moderation cases to the given channel.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn channel(
    ctx: Context<'_>,
    #[description = "Channel to post cases in"] channel: serenity::Channel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    ctx.data()
        .modlog
        .set_modlog_channel(guild_id.get(), channel.id().get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!(
        "Moderation cases will be posted in <#{}>.",
        channel.id()
    ))
    .await?;
    Ok(())
}

/// Stop posting moderation cases.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    ctx.data()
        .modlog
        .disable_modlog(guild_id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say("Modlog posting disabled.").await?;
    Ok(())
}

/// Show the most recent cases in this server.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn recent(
    ctx: Context<'_>,
    #[description = "How many cases to show (default 10)"]
    #[min = 1]
    #[max = 25]
    limit: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let cases = ctx
        .data()
        .modlog
        .recent_cases(guild_id.get(), limit.unwrap_or(10))
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    if cases.is_empty() {
        ctx.say("No cases recorded yet.").await?;
        return Ok(());
    }

    let lines: Vec<String> = cases
        .iter()
        .map(|case| {
            let status = if case.active {
                "active"
            } else if case.expired {
                "expired"
            } else {
                "closed"
            };
            format!(
                "`#{}` {} <@{}> ({}) - {}",
                case.id,
                case.action,
                case.target_id,
                status,
                case.reason.as_deref().unwrap_or("no reason")
            )
        })
        .collect();

    let embed = serenity::CreateEmbed::new()
        .title("Recent moderation cases")
        .description(lines.join("\n"))
        .color(0xED4245);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
