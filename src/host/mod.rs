//! Command-line backed implementations of the build and test host traits.

pub mod build;

pub use build::CommandBuildHost;
pub use test::CommandTestHost;
