pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::AppointmentError;
pub use handlers::AppointmentState;
pub use services::booking::AppointmentService;
pub use services::lifecycle::AppointmentStateMachine;
pub use services::policy::PolicyService;
