use serde::{Deserialize, Serialize};

use super::mqtt_handler::MqttError;

const DEFAULT_PORT: u16 = 1883;

/// Broker address and login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttServer {
    /// `host`, `host:port` or `mqtt://host:port`
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pw: String,
}

impl Default for MqttServer {
    fn default() -> Self {
        Self {
            url: "localhost:1883".to_string(),
            user: String::new(),
            pw: String::new(),
        }
    }
}

impl MqttServer {
    /// Split the URL into host and port, defaulting the port to 1883.
    pub fn host_port(&self) -> Result<(String, u16), MqttError> {
        let address = self
            .url
            .trim()
            .trim_start_matches("mqtt://")
            .trim_start_matches("tcp://");

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| MqttError::InvalidServer(self.url.clone()))?;
                (host, port)
            }
            None => (address, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(MqttError::InvalidServer(self.url.clone()));
        }
        Ok((host.to_string(), port))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub server: MqttServer,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Capacity of the client request queue and of the engine inbox
    pub channel_capacity: usize,
    /// Pause between reconnect attempts after a connection error
    pub poll_frequency: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: MqttServer::default(),
            client_id: "homesync".to_string(),
            keep_alive_secs: 5,
            channel_capacity: 100,
            poll_frequency: 2000,
        }
    }
}
