use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};

use crate::config::MqttSettings;
use crate::occupancy::OccupancyEvent;
use crate::publish::{
    EventSink, PublishError, AVAILABILITY_TOPIC_SUFFIX, PAYLOAD_OFFLINE, PAYLOAD_ONLINE,
};
use crate::transport::{build_transport, parse_mqtt_endpoint, TlsMaterials};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Publishes occupancy events with QoS 1, retained.
///
/// `publish` only enqueues onto the client's request channel. A background
/// thread drives the rumqttc event loop, which delivers in enqueue order and
/// reconnects on its own after the initial ConnAck.
pub struct MqttPublisher {
    client: Client,
    topic: String,
    status_topic: String,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    /// Connect and wait for the broker's ConnAck.
    ///
    /// Fails if the broker refuses the connection or does not answer within
    /// `connect_timeout`.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker)?;
        let tls = TlsMaterials::load(
            settings.tls_ca_path.as_deref(),
            settings.tls_client_cert_path.as_deref(),
            settings.tls_client_key_path.as_deref(),
        )?;
        let status_topic = format!("{}/{}", settings.topic, AVAILABILITY_TOPIC_SUFFIX);

        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(false);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            status_topic.clone(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        options.set_transport(build_transport(&endpoint, &tls)?);

        let (client, connection) = Client::new(options, settings.queue_capacity);
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = spawn_connection(
            connection,
            Arc::clone(&connected),
            Arc::clone(&shutdown),
            ready_tx,
        );

        let outcome = ready_rx.recv_timeout(settings.connect_timeout);
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(_) => Some(format!(
                "no ConnAck within {}s",
                settings.connect_timeout.as_secs_f32()
            )),
        };
        if let Some(reason) = failure {
            shutdown.store(true, Ordering::SeqCst);
            let _ = client.try_disconnect();
            // A hung TCP connect cannot be interrupted; the thread is left to
            // finish on its own.
            drop(handle);
            return Err(PublishError::NotConnected)
                .with_context(|| format!("MQTT broker {} unreachable: {}", endpoint, reason));
        }

        log::info!(
            "Connected to MQTT broker {} (TLS: {}, auth: {})",
            endpoint,
            endpoint.use_tls,
            settings.username.is_some()
        );

        let publisher = Self {
            client,
            topic: settings.topic.clone(),
            status_topic,
            connected,
            shutdown,
            connection_handle: Some(handle),
        };
        publisher
            .client
            .try_publish(
                &publisher.status_topic,
                QoS::AtLeastOnce,
                true,
                PAYLOAD_ONLINE.as_bytes().to_vec(),
            )
            .context("failed to publish availability")?;
        Ok(publisher)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn spawn_connection(
    mut connection: Connection,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), String>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut ready = Some(ready);
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    connected.store(true, Ordering::SeqCst);
                    match ready.take() {
                        Some(tx) => {
                            let _ = tx.send(Ok(()));
                        }
                        None => log::info!("MQTT connection re-established"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(e.to_string()));
                        break;
                    }
                    log::warn!("MQTT connection error: {}; retrying", e);
                    std::thread::sleep(RECONNECT_DELAY);
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
    })
}

impl EventSink for MqttPublisher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&mut self, event: &OccupancyEvent) -> Result<(), PublishError> {
        let payload = event
            .to_json()
            .map_err(|e| PublishError::Serialize(e.to_string()))?;
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, true, payload)
            .map_err(|_| {
                if self.is_connected() {
                    PublishError::QueueFull
                } else {
                    PublishError::Disconnected
                }
            })?;
        log::info!(
            "published occupancy count={} to {}",
            event.count,
            self.topic
        );
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if self.is_connected() {
            let _ = self.client.try_publish(
                &self.status_topic,
                QoS::AtLeastOnce,
                true,
                PAYLOAD_OFFLINE.as_bytes().to_vec(),
            );
        }
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request failed: {}", e);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}
