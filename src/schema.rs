use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};

use crate::{
    commands::{help, start},
    errors::BotError,
    handlers::link_received,
};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Show start message
    Start,
    /// Show supported links
    Help,
}

pub fn schema() -> UpdateHandler<BotError> {
    use dptree::case;

    Update::filter_message()
        .branch(
            // Filter for commands
            teloxide::filter_command::<Command, _>()
                .branch(case![Command::Start].endpoint(start))
                .branch(case![Command::Help].endpoint(help)),
        )
        // Any other text is a candidate link
        .branch(
            Message::filter_text()
                .filter(|text: String| !text.starts_with('/'))
                .endpoint(link_received),
        )
}
