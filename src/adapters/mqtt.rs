//! MQTT adapter: [`BusPort`] on top of `rumqttc`.
//!
//! ```text
//!  Orchestrator thread              network thread
//!  ───────────────────              ──────────────
//!  publish/subscribe ──▶ Client ──▶ Connection::iter()
//!                                        │
//!  is_open()   ◀── Mutex<LinkState> ◀────┤ ConnAck / errors
//!  get_messages() ◀── crossbeam queue ◀──┘ incoming Publish
//! ```
//!
//! The network thread owns the event loop and reconnects on its own.  It
//! records connectivity and a fatal error in [`LinkState`]; more than
//! `mqtt_max_disconnects` connection errors in a row, or a refused
//! connection, are fatal and surface through `is_open()`.
//!
//! MQTT 3.1.1 and MQTT 5 run on the matching `rumqttc` client.  Both event
//! streams are reduced to [`LinkEvent`] so one handler drives the link
//! state.  TLS is enabled as soon as a CA, client certificate or key is
//! configured; without a CA file the platform trust store is used.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use rumqttc::{
    Client, ConnectionError, Event, LastWill, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport, v5,
};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::app::ports::{BusMessage, BusPort};
use crate::config::{MQTT_V5, MQTT_V311, SystemConfig};
use crate::error::{BusError, ConfigError};

/// Client request queue capacity.
const REQUEST_CAPACITY: usize = 32;
/// Pause between reconnect attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

// ───────────────────────────────────────────────────────────────
// Settings
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    V311,
    V5,
}

impl Protocol {
    pub fn from_level(level: u8) -> Result<Self, ConfigError> {
        match level {
            MQTT_V311 => Ok(Self::V311),
            MQTT_V5 => Ok(Self::V5),
            other => Err(ConfigError::Invalid(format!(
                "'mqtt_protocol' must be 4 (MQTT 3.1.1) or 5 (MQTT 5) (got {other})"
            ))),
        }
    }
}

/// Connection parameters extracted and checked from [`SystemConfig`].
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub client_id: String,
    pub keepalive: Duration,
    pub qos: QoS,
    pub retain: bool,
    /// Default channel for readings and the last will.
    pub channel: String,
    pub last_will: Option<String>,
    pub credentials: Option<(String, String)>,
    pub tls: Option<Arc<ClientConfig>>,
    pub max_disconnects: u32,
}

impl MqttSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self, ConfigError> {
        let host = non_empty(config.mqtt_host.as_deref()).ok_or(ConfigError::Missing("mqtt_host"))?;
        let client_id = non_empty(config.mqtt_client_id.as_deref())
            .ok_or(ConfigError::Missing("mqtt_client_id"))?;
        let channel = non_empty(config.mqtt_channel_out_state.as_deref())
            .ok_or(ConfigError::Missing("mqtt_channel_out_state"))?;

        let credentials = match (&config.mqtt_user_name, &config.mqtt_user_pwd) {
            (None, None) => None,
            (user, pwd) => Some((
                user.clone().unwrap_or_default(),
                pwd.clone().unwrap_or_default(),
            )),
        };

        let tls = if config.uses_tls() {
            Some(Arc::new(tls_config(config)?))
        } else {
            None
        };

        Ok(Self {
            host: host.to_owned(),
            port: config.broker_port(),
            protocol: Protocol::from_level(config.mqtt_protocol)?,
            client_id: client_id.to_owned(),
            keepalive: Duration::from_secs(config.mqtt_keepalive),
            qos: qos(config.mqtt_quality)?,
            retain: config.mqtt_retain,
            channel: channel.to_owned(),
            last_will: config.mqtt_last_will.clone().filter(|w| !w.is_empty()),
            credentials,
            tls,
            max_disconnects: config.mqtt_max_disconnects,
        })
    }

    fn transport(&self) -> Option<Transport> {
        self.tls
            .as_ref()
            .map(|tls| Transport::tls_with_config(TlsConfiguration::Rustls(Arc::clone(tls))))
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keepalive);
        if let Some(will) = &self.last_will {
            options.set_last_will(LastWill::new(
                &self.channel,
                will.as_bytes().to_vec(),
                self.qos,
                self.retain,
            ));
        }
        if let Some((user, pwd)) = &self.credentials {
            options.set_credentials(user, pwd);
        }
        if let Some(transport) = self.transport() {
            options.set_transport(transport);
        }
        options
    }

    fn options_v5(&self) -> v5::MqttOptions {
        let mut options = v5::MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keepalive);
        if let Some(will) = &self.last_will {
            options.set_last_will(v5::mqttbytes::v5::LastWill::new(
                &self.channel,
                will.as_bytes().to_vec(),
                qos_v5(self.qos),
                self.retain,
                None,
            ));
        }
        if let Some((user, pwd)) = &self.credentials {
            options.set_credentials(user, pwd);
        }
        if let Some(transport) = self.transport() {
            options.set_transport(transport);
        }
        options
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))
}

pub fn qos(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::Invalid(format!(
            "'mqtt_quality' must be 0, 1 or 2 (got {other})"
        ))),
    }
}

fn qos_v5(qos: QoS) -> v5::mqttbytes::QoS {
    match qos {
        QoS::AtMostOnce => v5::mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => v5::mqttbytes::QoS::AtLeastOnce,
        QoS::ExactlyOnce => v5::mqttbytes::QoS::ExactlyOnce,
    }
}

// ───────────────────────────────────────────────────────────────
// TLS
// ───────────────────────────────────────────────────────────────

/// Client TLS setup: roots from `mqtt_ssl_ca_certs` (or the platform
/// store), optional client certificate, optional relaxed host check.
fn tls_config(config: &SystemConfig) -> Result<ClientConfig, ConfigError> {
    let roots = Arc::new(root_store(config.mqtt_ssl_ca_certs.as_deref())?);
    let builder = ClientConfig::builder().with_root_certificates(Arc::clone(&roots));
    let mut tls = match (&config.mqtt_ssl_certfile, &config.mqtt_ssl_keyfile) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs(cert)?, read_key(key)?)
            .map_err(|e| pem_error(key, e))?,
        _ => builder.with_no_client_auth(),
    };
    if config.mqtt_ssl_insecure {
        info!("disabling SSL certificate verification");
        let verifier = AnyHostName::new(roots)?;
        tls.dangerous().set_certificate_verifier(Arc::new(verifier));
    }
    Ok(tls)
}

fn root_store(ca: Option<&Path>) -> Result<RootCertStore, ConfigError> {
    let certs = match ca {
        Some(path) => read_certs(path)?,
        None => rustls_native_certs::load_native_certs()
            .map_err(|e| ConfigError::Io(format!("platform root certificates: {e}")))?,
    };
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!("{added} root certificates loaded, {ignored} ignored");
    if roots.is_empty() {
        return Err(ConfigError::Invalid("no usable root certificate".into()));
    }
    Ok(roots)
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let pem = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e))?;
    if certs.is_empty() {
        return Err(pem_error(path, "no certificate found"));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let pem = read_file(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| pem_error(path, e))?
        .ok_or_else(|| pem_error(path, "no private key found"))
}

fn pem_error(path: &Path, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid(format!("{}: {e}", path.display()))
}

/// Full chain verification, but a certificate issued for another host
/// name is accepted.
#[derive(Debug)]
struct AnyHostName(Arc<WebPkiServerVerifier>);

impl AnyHostName {
    fn new(roots: Arc<RootCertStore>) -> Result<Self, ConfigError> {
        WebPkiServerVerifier::builder(roots)
            .build()
            .map(Self)
            .map_err(|e| ConfigError::Invalid(format!("certificate verifier: {e}")))
    }
}

impl ServerCertVerifier for AnyHostName {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .0
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                debug!("accepting broker certificate for another host name");
                Ok(ServerCertVerified::assertion())
            }
            verdict => verdict,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.0.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.0.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_verify_schemes()
    }
}

// ───────────────────────────────────────────────────────────────
// Link state (shared with the network thread)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    /// Connection errors since the last successful ConnAck.
    disconnects: u32,
    fatal: Option<String>,
    closing: bool,
}

type SharedLink = Arc<Mutex<LinkState>>;

fn lock(link: &SharedLink) -> MutexGuard<'_, LinkState> {
    // A poisoned lock only means the network thread panicked; the state
    // itself is still a plain value.
    link.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

/// Request handle of the protocol-specific client.
enum Session {
    V311(Client),
    V5(v5::Client),
}

impl Session {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError> {
        match self {
            Self::V311(client) => client.subscribe(topic, qos).map_err(client_error),
            Self::V5(client) => client.subscribe(topic, qos_v5(qos)).map_err(client_error),
        }
    }

    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &str) -> Result<(), BusError> {
        let payload = payload.as_bytes().to_vec();
        match self {
            Self::V311(client) => client
                .publish(topic, qos, retain, payload)
                .map_err(client_error),
            Self::V5(client) => client
                .publish(topic, qos_v5(qos), retain, payload)
                .map_err(client_error),
        }
    }

    fn disconnect(&self) -> Result<(), BusError> {
        match self {
            Self::V311(client) => client.disconnect().map_err(client_error),
            Self::V5(client) => client.disconnect().map_err(client_error),
        }
    }
}

fn client_error(e: impl std::fmt::Display) -> BusError {
    BusError::Client(e.to_string())
}

pub struct MqttBus {
    settings: MqttSettings,
    link: SharedLink,
    session: Option<Session>,
    inbox: Option<Receiver<BusMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl MqttBus {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            link: Arc::default(),
            session: None,
            inbox: None,
            worker: None,
        }
    }

    fn session(&self) -> Result<&Session, BusError> {
        self.session.as_ref().ok_or(BusError::NotConnected)
    }
}

impl BusPort for MqttBus {
    fn open(&mut self) -> Result<(), BusError> {
        if self.session.is_some() {
            return Err(BusError::Client("already open".into()));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let link = Arc::clone(&self.link);
        let max_disconnects = self.settings.max_disconnects;

        let (session, worker) = match self.settings.protocol {
            Protocol::V311 => {
                let (client, mut connection) =
                    Client::new(self.settings.options(), REQUEST_CAPACITY);
                let worker = spawn_network(move || {
                    pump(
                        connection.iter().map(LinkEvent::from),
                        &link,
                        &tx,
                        max_disconnects,
                    );
                })?;
                (Session::V311(client), worker)
            }
            Protocol::V5 => {
                let (client, mut connection) =
                    v5::Client::new(self.settings.options_v5(), REQUEST_CAPACITY);
                let worker = spawn_network(move || {
                    pump(
                        connection.iter().map(LinkEvent::from),
                        &link,
                        &tx,
                        max_disconnects,
                    );
                })?;
                (Session::V5(client), worker)
            }
        };

        info!(
            "connecting to MQTT {}:{} as '{}' ({:?}{})",
            self.settings.host,
            self.settings.port,
            self.settings.client_id,
            self.settings.protocol,
            if self.settings.tls.is_some() { ", TLS" } else { "" }
        );
        self.session = Some(session);
        self.inbox = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn is_open(&mut self) -> Result<bool, BusError> {
        let link = lock(&self.link);
        if let Some(fatal) = &link.fatal {
            return Err(BusError::Fatal(fatal.clone()));
        }
        Ok(self.session.is_some() && link.connected)
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<(), BusError> {
        let session = self.session()?;
        for topic in topics {
            session.subscribe(topic, self.settings.qos)?;
        }
        Ok(())
    }

    fn get_messages(&mut self) -> Vec<BusMessage> {
        self.inbox
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }

    fn publish(
        &mut self,
        payload: &str,
        channel: Option<&str>,
        retain: Option<bool>,
    ) -> Result<(), BusError> {
        if !lock(&self.link).connected {
            return Err(BusError::NotConnected);
        }
        let topic = channel.unwrap_or(&self.settings.channel);
        self.session()?.publish(
            topic,
            self.settings.qos,
            retain.unwrap_or(self.settings.retain),
            payload,
        )?;
        info!("publish {topic}: {payload}");
        Ok(())
    }

    fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let connected = {
            let mut link = lock(&self.link);
            link.closing = true;
            link.connected
        };

        if let Some(will) = &self.settings.last_will {
            if connected {
                if let Err(e) = session.publish(
                    &self.settings.channel,
                    self.settings.qos,
                    self.settings.retain,
                    will,
                ) {
                    error!("cannot send last will: {e}");
                }
            } else {
                error!("cannot send last will (not connected)");
            }
        }

        if let Err(e) = session.disconnect() {
            warn!("MQTT disconnect request failed: {e}");
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("mqtt network thread panicked");
            }
        }
        self.inbox = None;
        debug!("mqtt closed");
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.close();
    }
}

// ───────────────────────────────────────────────────────────────
// Network thread
// ───────────────────────────────────────────────────────────────

fn spawn_network(run: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>, BusError> {
    std::thread::Builder::new()
        .name("mqtt".into())
        .spawn(run)
        .map_err(client_error)
}

fn pump(
    events: impl Iterator<Item = LinkEvent>,
    link: &SharedLink,
    inbox: &Sender<BusMessage>,
    max_disconnects: u32,
) {
    for event in events {
        if !handle_event(event, link, inbox, max_disconnects) {
            break;
        }
    }
    lock(link).connected = false;
    debug!("mqtt network thread finished");
}

/// Event-loop notification, reduced to what the link state needs.
#[derive(Debug, PartialEq)]
enum LinkEvent {
    Connected(String),
    Message(BusMessage),
    DisconnectedByBroker,
    Disconnecting,
    Refused(String),
    Failed(String),
    Other,
}

impl From<Result<Event, ConnectionError>> for LinkEvent {
    fn from(notification: Result<Event, ConnectionError>) -> Self {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => Self::Connected(format!("{:?}", ack.code)),
            Ok(Event::Incoming(Packet::Publish(publish))) => Self::Message(BusMessage::new(
                publish.topic,
                String::from_utf8_lossy(&publish.payload).into_owned(),
            )),
            Ok(Event::Incoming(Packet::Disconnect)) => Self::DisconnectedByBroker,
            Ok(Event::Outgoing(Outgoing::Disconnect)) => Self::Disconnecting,
            Ok(_) => Self::Other,
            Err(ConnectionError::ConnectionRefused(code)) => Self::Refused(format!("{code:?}")),
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

impl From<Result<v5::Event, v5::ConnectionError>> for LinkEvent {
    fn from(notification: Result<v5::Event, v5::ConnectionError>) -> Self {
        use v5::mqttbytes::v5::Packet as P5;

        match notification {
            Ok(v5::Event::Incoming(P5::ConnAck(ack))) => Self::Connected(format!("{:?}", ack.code)),
            Ok(v5::Event::Incoming(P5::Publish(publish))) => Self::Message(BusMessage::new(
                String::from_utf8_lossy(&publish.topic).into_owned(),
                String::from_utf8_lossy(&publish.payload).into_owned(),
            )),
            Ok(v5::Event::Incoming(P5::Disconnect(_))) => Self::DisconnectedByBroker,
            Ok(v5::Event::Outgoing(Outgoing::Disconnect)) => Self::Disconnecting,
            Ok(_) => Self::Other,
            Err(v5::ConnectionError::ConnectionRefused(code)) => Self::Refused(format!("{code:?}")),
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

/// Apply one event to the link state.  Returns `false` to stop the
/// network thread.
fn handle_event(
    event: LinkEvent,
    link: &SharedLink,
    inbox: &Sender<BusMessage>,
    max_disconnects: u32,
) -> bool {
    match event {
        LinkEvent::Connected(code) => {
            let mut state = lock(link);
            state.connected = true;
            state.disconnects = 0;
            info!("successfully connected to MQTT ({code})");
            true
        }
        // The receiver only goes away on close.
        LinkEvent::Message(message) => inbox.send(message).is_ok(),
        LinkEvent::DisconnectedByBroker => {
            warn!("disconnected by MQTT broker");
            lock(link).connected = false;
            true
        }
        LinkEvent::Disconnecting => {
            info!("disconnected from MQTT");
            false
        }
        LinkEvent::Other => true,
        LinkEvent::Refused(code) => {
            let mut state = lock(link);
            state.connected = false;
            if !state.closing {
                state.fatal = Some(format!("connection refused ({code})"));
                error!("connect to MQTT failed: {code}");
            }
            false
        }
        LinkEvent::Failed(cause) => {
            let mut state = lock(link);
            state.connected = false;
            if state.closing {
                return false;
            }
            state.disconnects += 1;
            error!(
                "MQTT connection error {}/{}: {cause}",
                state.disconnects, max_disconnects
            );
            if state.disconnects > max_disconnects {
                state.fatal = Some(format!(
                    "{} connection errors in a row ({cause})",
                    state.disconnects
                ));
                return false;
            }
            drop(state);
            std::thread::sleep(RECONNECT_BACKOFF);
            true
        }
    }
}
