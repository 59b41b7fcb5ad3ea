pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::QueueError;
pub use handlers::QueueState;
pub use models::*;
pub use router::create_queue_router;
pub use services::ticketing::QueueTicketingService;
