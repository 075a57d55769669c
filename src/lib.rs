pub mod config;
pub mod duration;
pub mod events;
pub mod features;
pub mod input;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod service;
pub mod session;
pub mod simulator;
pub mod table;
pub mod targets;
pub mod transform;
pub mod verify;
pub mod windows;
