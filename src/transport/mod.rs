//! Broker transport plumbing: endpoint parsing and TLS material loading.

mod tls;

pub use tls::{
    build_transport, parse_mqtt_endpoint, MqttEndpoint, TlsMaterials, DEFAULT_MQTTS_PORT,
    DEFAULT_MQTT_PORT,
};
