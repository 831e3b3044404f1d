mod repo;
mod schema;

pub use repo::{DocRecord, DocRepo};
pub use schema::init_database;
