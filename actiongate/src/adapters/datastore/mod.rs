pub mod repo_mem;

pub use repo_mem::InMemoryDatastore;
