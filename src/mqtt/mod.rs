//! # Broker adapter
//!
//! Connects to the MQTT broker, subscribes to every routed topic and hands
//! incoming publishes to the sync engine as [`BusMessage`](message_manager::BusMessage)s.
//! Nothing is ever published back to the bus.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address, login and client tuning
//! ├── message_manager.rs  - Inbound message type and engine channel
//! └── mqtt_handler.rs     - Event loop, reconnect backoff and status
//! ```
//!
//! Connection state is exposed through a `watch` channel of
//! [`MqttStatus`](mqtt_handler::MqttStatus) so callers can show whether the
//! bus is reachable. The handler stops when its cancellation token fires or
//! when the engine drops its inbox.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
