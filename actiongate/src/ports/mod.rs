pub mod datastore;
pub mod dispatch;
