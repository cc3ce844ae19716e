use teloxide::{prelude::*, utils::command::BotCommands};

use crate::{errors::HandlerResult, schema::Command};

pub async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        format!(
            "Поддерживаются ссылки youtube.com/watch, youtu.be, /shorts и /embed.\n\n{}",
            Command::descriptions()
        ),
    )
    .await?;
    Ok(())
}
