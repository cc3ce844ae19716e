use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{FileId, InputFile, LinkPreviewOptions},
};

use crate::{
    errors::{BotError, HandlerResult},
    relay::{AudioRelay, Served},
    utils::is_youtube_video_link,
};

pub async fn link_received(bot: Bot, msg: Message, relay: Arc<AudioRelay>) -> HandlerResult {
    let text = msg
        .text()
        .ok_or_else(|| BotError::general("Text should be here. It's invalid state"))?;

    if !is_youtube_video_link(text) {
        log::debug!("Ignoring non-YouTube text from chat {}", msg.chat.id);
        bot.send_message(msg.chat.id, BotError::invalid_link(text).user_message())
            .await?;
        return Ok(());
    }

    // Send immediate feedback
    let status_msg = bot
        .send_message(msg.chat.id, "⏳ Загружаю аудио, пожалуйста подождите...")
        .await?;

    match relay.process(text).await {
        Ok(served) => {
            bot.edit_message_text(msg.chat.id, status_msg.id, reply_text(&served))
                .link_preview_options(no_preview())
                .await?;

            // Without a link the user can't open the channel post, send the file itself
            let audio = served.audio();
            if audio.delivery_link.is_none() {
                bot.send_audio(
                    msg.chat.id,
                    InputFile::file_id(FileId(audio.delivery_handle.clone())),
                )
                .await?;
            }
        }
        Err(e) => {
            if e.is_fatal() {
                log::error!("Bot is misconfigured, failed on {}: {}", text, e);
            } else {
                log::error!("Error processing YouTube URL {}: {}", text, e);
            }
            bot.edit_message_text(msg.chat.id, status_msg.id, e.user_message())
                .await?;
        }
    }

    Ok(())
}

fn reply_text(served: &Served) -> String {
    let audio = served.audio();
    let header = if served.is_cached() {
        "🔁 Этот трек уже загружали раньше:"
    } else {
        "✅ Файл успешно загружен:"
    };

    match &audio.delivery_link {
        Some(link) => format!(
            "{}\n\n🎵 {}\n\nСкачать можно здесь:\n{}",
            header, audio.display_name, link
        ),
        None => format!("{}\n\n🎵 {}", header, audio.display_name),
    }
}

fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}
