// Library exports for the CLI and integration tests

pub mod archive;
pub mod book;
pub mod config;
pub mod cue;
pub mod fetch;
pub mod process;
pub mod progress;
pub mod spine;
pub mod tags;
pub mod timeline;
pub mod toc;
