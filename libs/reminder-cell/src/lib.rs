pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::ReminderError;
pub use handlers::ReminderState;
pub use models::*;
pub use router::create_reminder_router;
pub use services::dispatcher::ReminderDispatcher;
pub use services::scheduler::ReminderScheduler;
pub use services::sender::{sender_from_config, HttpEmailSender, LogOnlySender, NotificationSender};
