pub mod datastore;
pub mod flowchart;
