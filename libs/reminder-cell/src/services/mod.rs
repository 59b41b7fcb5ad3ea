pub mod dispatcher;
pub mod scheduler;
pub mod sender;
pub mod template;
