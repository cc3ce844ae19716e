use teloxide::prelude::*;

use crate::errors::HandlerResult;

pub async fn start(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "Отправь мне ссылку на YouTube видео, и я пришлю ссылку на MP3 файл.",
    )
    .await?;
    Ok(())
}
