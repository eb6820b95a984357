pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use pool::{create_pool, run_migrations};
pub use postgres::PgStore;
pub use store::{AccountStore, CategoryStore, ItemStore};
