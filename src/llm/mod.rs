pub mod backend;
pub mod client;
pub mod local;
pub mod prompt;
pub mod templates;
