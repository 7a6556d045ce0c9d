//! Shared pieces of the tuner Player/Remote pair: the line protocol, the
//! persisted settings, the station list and on-disk configuration.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod settings;
pub mod stations;
