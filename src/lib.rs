//! Home state synchronization over MQTT.
//!
//! [`sync`] holds the state core, [`mqtt`] the broker adapter feeding it,
//! [`auth`] the login check and [`config`] the TOML settings.

pub mod auth;
pub mod config;
pub mod mqtt;
pub mod sync;
