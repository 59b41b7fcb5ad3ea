pub mod error;
pub mod repository;
pub mod memory;
pub mod supabase;
pub mod supabase_store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use repository::*;
pub use supabase::{SupabaseApiError, SupabaseClient};
pub use supabase_store::SupabaseStore;
