mod channel;
mod commands;
mod config;
mod db;
mod errors;
mod handlers;
mod inflight;
mod migrations;
mod relay;
mod schema;
mod temp_file;
mod utils;
mod youtube;

use std::sync::Arc;

use teloxide::{prelude::*, update_listeners::webhooks};
use tokio::fs;

use crate::{
    channel::ChannelPublisher,
    config::Config,
    db::AudioCache,
    errors::BotResult,
    relay::AudioRelay,
    schema::schema,
    temp_file::WorkDir,
    utils::sweep_orphaned_downloads,
    youtube::YtDlp,
};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    pretty_env_logger::init();
    log::info!("Starting audio relay bot...");

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> BotResult<()> {
    let config = Config::from_env()?;

    fs::create_dir_all(&config.work_dir).await?;
    let swept = sweep_orphaned_downloads(&config.work_dir).await?;
    if swept > 0 {
        log::info!("Removed {} leftover download files", swept);
    }

    let cache = AudioCache::connect(&config.database_url).await?;
    log::info!("Audio cache ready ({} entries)", cache.count().await?);

    let bot = Bot::new(&config.bot_token);

    let publisher = ChannelPublisher::new(bot.clone(), config.channel.clone());
    publisher.verify().await?;

    let fetcher = YtDlp::from_config(&config).await?;

    let relay = Arc::new(
        AudioRelay::new(
            cache,
            Arc::new(fetcher),
            Arc::new(publisher),
            WorkDir::new(&config.work_dir),
        )
        .with_timeouts(config.download_timeout, config.upload_timeout),
    );

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![relay])
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build();

    match &config.webhook {
        Some(webhook) => {
            log::info!("Listening for webhooks on {}", webhook.address);
            let listener = webhooks::axum(
                bot,
                webhooks::Options::new(webhook.address, webhook.url.clone()),
            )
            .await?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => dispatcher.dispatch().await,
    }

    sweep_orphaned_downloads(&config.work_dir).await?;
    Ok(())
}
