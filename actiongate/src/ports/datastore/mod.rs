pub mod repo_port;

pub use repo_port::{get_as, Datastore, DatastoreError};
