//! MQTT endpoint parsing and TLS transport selection.
//!
//! Broker addresses accept:
//! - `host` or `host:port` (plain TCP, port defaults to 1883)
//! - `mqtt://host[:port]` / `tcp://host[:port]` (plain TCP)
//! - `mqtts://host[:port]` / `ssl://host[:port]` (TLS, port defaults to 8883)
//! - `[ipv6]:port`

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Parsed broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl std::fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// PEM material for broker verification and optional mutual TLS.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// CA bundle. `None` means the default webpki roots.
    pub ca: Option<Vec<u8>>,

    /// Client certificate and key, always provided together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

/// Pick the rumqttc transport for an endpoint.
pub fn build_transport(endpoint: &MqttEndpoint, materials: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if materials.is_configured() {
            return Err(anyhow!(
                "MQTT TLS materials provided but the broker address is plain TCP; use mqtts://"
            ));
        }
        return Ok(Transport::tcp());
    }

    if !materials.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }

    let ca = materials.ca.clone().ok_or_else(|| {
        anyhow!("MQTT TLS CA certificate is required when providing a client certificate")
    })?;
    Ok(Transport::tls(ca, materials.client_auth.clone(), None))
}

pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();
    if remainder.is_empty() {
        return Err(anyhow!("MQTT broker address is empty"));
    }

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest.trim_end_matches('/');
    }

    let default_port = if use_tls {
        DEFAULT_MQTTS_PORT
    } else {
        DEFAULT_MQTT_PORT
    };
    let (host, port) = split_host_port(remainder, default_port)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port, addr)?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port, addr)?)),
        None => Ok((addr.to_string(), default_port)),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_plain() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
    }

    #[test]
    fn parse_endpoint_default_ports() {
        assert_eq!(parse_mqtt_endpoint("localhost").unwrap().port, 1883);
        let tls = parse_mqtt_endpoint("mqtts://broker.example.com").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.use_tls);
    }

    #[test]
    fn parse_endpoint_ipv6() {
        let ep = parse_mqtt_endpoint("[::1]:1884").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1884);
        assert_eq!(ep.to_string(), "mqtt://[::1]:1884");
    }

    #[test]
    fn parse_endpoint_rejects_garbage() {
        assert!(parse_mqtt_endpoint("").is_err());
        assert!(parse_mqtt_endpoint("ws://host:80").is_err());
        assert!(parse_mqtt_endpoint("host:notaport").is_err());
        assert!(parse_mqtt_endpoint("mqtt://:1883").is_err());
    }

    #[test]
    fn tls_materials_require_cert_and_key_together() {
        let cert_only = TlsMaterials::load(None, Some(Path::new("/nonexistent/cert.pem")), None);
        assert!(cert_only.unwrap_err().to_string().contains("without key"));
    }

    #[test]
    fn plain_endpoint_refuses_tls_materials() {
        let ep = parse_mqtt_endpoint("localhost:1883").unwrap();
        let materials = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        assert!(build_transport(&ep, &materials).is_err());
        assert!(build_transport(&ep, &TlsMaterials::default()).is_ok());
    }
}
