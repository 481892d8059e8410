pub mod cgroup;
pub mod cli;
pub mod config;
pub mod passthrough;
pub mod sandbox;
pub mod system;
