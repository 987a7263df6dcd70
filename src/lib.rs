pub mod classify;
pub mod cli;
pub mod config;
pub mod core;
pub mod correlate;
pub mod exit;
pub mod handoff;
pub mod kube;
pub mod local;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod probes;
pub mod ui;
