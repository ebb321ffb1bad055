// Non-command gateway events the bot reacts to.

use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

pub async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildBanRemoval {
            guild_id,
            unbanned_user,
        } => {
            // A manual unban closes any timed ban cases for that member so
            // the scheduler does not try to unban them again later.
            match data
                .modlog
                .handle_member_unbanned(guild_id.get(), unbanned_user.id.get())
                .await
            {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(
                        guild_id = guild_id.get(),
                        user_id = unbanned_user.id.get(),
                        count,
                        "closed ban cases after manual unban"
                    );
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to close ban cases after unban");
                }
            }
        }
        _ => {}
    }

    Ok(())
}
