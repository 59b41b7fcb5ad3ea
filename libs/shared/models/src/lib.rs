pub mod auth;
pub mod error;
pub mod appointment;
pub mod policy;
pub mod queue;
pub mod reminder;

pub use appointment::*;
pub use policy::*;
pub use queue::*;
pub use reminder::*;
