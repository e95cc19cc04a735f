pub mod embedding;
pub mod handlers;
pub mod payloads;
pub mod queries;
