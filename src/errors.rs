use std::fmt;

/// Централизованная система ошибок для telegram бота
#[derive(Debug)]
pub enum BotError {
    /// Сообщение не является ссылкой на YouTube
    InvalidLink(String),
    /// Ошибки загрузки с YouTube
    Download(String),
    /// yt-dlp завершился успешно, но файла нет
    OutputMissing(String),
    /// Ошибки отправки файла в канал
    Upload(String),
    /// Telegram отклонил канал назначения
    ChannelRejected(String),
    /// Ошибки базы данных
    Storage(sqlx::Error),
    /// Ошибки конфигурации
    Config(String),
    /// Ошибки файловой системы
    FileSystemError(std::io::Error),
    /// Ошибки Telegram API
    TelegramError(teloxide::RequestError),
    /// Ошибки парсинга данных
    ParseError(String),
    /// Внешняя команда завершилась с ошибкой
    ExternalCommandError { command: String, stderr: String },
    /// Общая ошибка с описанием
    General(String),
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotError::InvalidLink(text) => write!(f, "Not a YouTube link: {}", text),
            BotError::Download(msg) => write!(f, "Download failed: {}", msg),
            BotError::OutputMissing(path) => {
                write!(f, "Downloader reported success but {} does not exist", path)
            }
            BotError::Upload(msg) => write!(f, "Upload failed: {}", msg),
            BotError::ChannelRejected(msg) => {
                write!(f, "Destination channel rejected: {}", msg)
            }
            BotError::Storage(e) => write!(f, "Storage error: {}", e),
            BotError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BotError::FileSystemError(e) => write!(f, "File system error: {}", e),
            BotError::TelegramError(e) => write!(f, "Telegram API error: {}", e),
            BotError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            BotError::ExternalCommandError { command, stderr } => {
                write!(f, "Command {} failed: {}", command, stderr)
            }
            BotError::General(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for BotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BotError::Storage(e) => Some(e),
            BotError::FileSystemError(e) => Some(e),
            BotError::TelegramError(e) => Some(e),
            _ => None,
        }
    }
}

// Реализации From для автоматического преобразования ошибок
impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::FileSystemError(err)
    }
}

impl From<teloxide::RequestError> for BotError {
    fn from(err: teloxide::RequestError) -> Self {
        BotError::TelegramError(err)
    }
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        BotError::Storage(err)
    }
}

impl From<sqlx::migrate::MigrateError> for BotError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        BotError::Storage(sqlx::Error::Migrate(Box::new(err)))
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::ParseError(format!("JSON parsing error: {}", err))
    }
}

// Удобные методы для создания ошибок
impl BotError {
    pub fn invalid_link(text: impl Into<String>) -> Self {
        Self::InvalidLink(text.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn output_missing(path: impl Into<String>) -> Self {
        Self::OutputMissing(path.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    pub fn channel_rejected(msg: impl Into<String>) -> Self {
        Self::ChannelRejected(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn external_command_error(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ExternalCommandError {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// Errors that mean the bot is misconfigured rather than the request being bad.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Config(_) | BotError::ChannelRejected(_))
    }

    /// Текст для пользователя. Никаких подробностей и стектрейсов.
    pub fn user_message(&self) -> &'static str {
        match self {
            BotError::InvalidLink(_) => "❌ Пожалуйста, отправьте корректную ссылку на YouTube видео.",
            BotError::Download(_)
            | BotError::OutputMissing(_)
            | BotError::ExternalCommandError { .. } => {
                "❌ Не удалось скачать аудио. Попробуйте позже."
            }
            BotError::Upload(_) | BotError::TelegramError(_) => {
                "❌ Не удалось отправить файл. Попробуйте позже."
            }
            _ => "❌ Произошла ошибка при обработке запроса. Попробуйте позже.",
        }
    }
}

/// Результат операций бота
pub type BotResult<T> = Result<T, BotError>;

/// Результат для хендлеров
pub type HandlerResult = BotResult<()>;
