pub mod senders;

pub use senders::{Notifier, ParseMode, SenderError, telegram::TelegramSender};
