pub mod credit_store;
pub mod pool;

pub use credit_store::PgCreditStore;
pub use pool::create_pool;
