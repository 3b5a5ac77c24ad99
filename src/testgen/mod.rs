pub mod batch;
pub mod build;
pub mod execution;
pub mod materialize;
pub mod orchestrator;
pub mod parser;
pub mod request;
