pub mod config;
pub mod domain;
pub mod engine;
pub mod numerics;
pub mod parser;
pub mod paths;
pub mod plot;
pub mod regression;
pub mod runner;
pub mod scenario;
