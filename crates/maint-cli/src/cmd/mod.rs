pub mod config;
pub mod group;
pub mod update;
