use std::path::Path;

use async_trait::async_trait;
use teloxide::{
    ApiError, RequestError,
    prelude::*,
    types::{InputFile, Recipient},
};

use crate::errors::{BotError, BotResult};

/// What the messenger hands back after an upload
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Telegram `file_id`, lets us re-send without uploading again
    pub handle: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AudioUpload<'a> {
    pub path: &'a Path,
    pub title: &'a str,
    pub performer: Option<&'a str>,
    pub file_name: String,
    pub duration: Option<u32>,
}

#[async_trait]
pub trait AudioPublisher: Send + Sync {
    async fn publish(&self, upload: &AudioUpload<'_>) -> BotResult<Delivery>;
}

/// Posts audio files to the storage channel.
pub struct ChannelPublisher {
    bot: Bot,
    channel: Recipient,
}

impl ChannelPublisher {
    pub fn new(bot: Bot, channel: Recipient) -> Self {
        Self { bot, channel }
    }

    /// Fails if Telegram does not know the channel or the bot cannot see it.
    pub async fn verify(&self) -> BotResult<()> {
        let chat = self
            .bot
            .get_chat(self.channel.clone())
            .await
            .map_err(|e| BotError::channel_rejected(format!("{:?}: {}", self.channel, e)))?;

        log::info!("Destination channel resolved: {:?} ({})", self.channel, chat.id);
        Ok(())
    }
}

#[async_trait]
impl AudioPublisher for ChannelPublisher {
    async fn publish(&self, upload: &AudioUpload<'_>) -> BotResult<Delivery> {
        let file = InputFile::file(upload.path).file_name(upload.file_name.clone());

        let mut request = self
            .bot
            .send_audio(self.channel.clone(), file)
            .title(upload.title);
        if let Some(performer) = upload.performer {
            request = request.performer(performer);
        }
        if let Some(duration) = upload.duration {
            request = request.duration(duration);
        }

        let message = request.await.map_err(|e| classify_upload_error(&self.channel, e))?;

        let audio = message
            .audio()
            .ok_or_else(|| BotError::upload("Telegram returned a message without audio"))?;

        Ok(Delivery {
            handle: audio.file.id.to_string(),
            link: message.url().map(|url| url.to_string()),
        })
    }
}

fn classify_upload_error(channel: &Recipient, err: RequestError) -> BotError {
    let rejected = match &err {
        RequestError::Api(
            ApiError::ChatNotFound
            | ApiError::NotEnoughRightsToPostMessages
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::BotKickedFromChannel,
        )
        | RequestError::MigrateToChatId(_) => true,
        RequestError::Api(ApiError::Unknown(text)) => {
            text.contains("Forbidden")
                || text.contains("not enough rights")
                || text.contains("have no rights")
        }
        _ => false,
    };

    if rejected {
        BotError::channel_rejected(format!("{:?}: {}", channel, err))
    } else {
        BotError::TelegramError(err)
    }
}
