//! Internet-radio Player/Remote pair.
//!
//! A device in Player mode owns playback and answers line commands on a TCP
//! port; a device in Remote mode sends those commands and mirrors the
//! Player's state by polling.

pub mod analyzer;
pub mod client;
pub mod console;
pub mod controller;
pub mod core;
pub mod engine;
pub mod listener;
pub mod logging;
pub mod poller;
pub mod resolver;
