pub mod connections;
pub mod identifier;
pub mod report;
pub mod request;
pub mod schema;
