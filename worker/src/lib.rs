pub mod cli;
pub mod engine;
pub mod meter;
pub mod reporter;
pub mod runner;
