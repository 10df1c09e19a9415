//! UDP discovery datagrams.
//!
//! The beacon advertises the alert service under a fixed service type and
//! instance name.  Browsers broadcast a [`DiscoveryDatagram::Query`] and every
//! advertiser of the same service type answers with a
//! [`DiscoveryDatagram::Announce`], unicast back to the querying socket, naming
//! the TCP port it accepts alert streams on.
//!
//! Datagrams are small JSON objects tagged by a `"type"` field:
//!
//! ```json
//! {"type":"query","serviceType":"_emergencyapp._tcp"}
//! {"type":"announce","serviceType":"_emergencyapp._tcp","instanceName":"EmergencyApp","port":52011,"protocolVersion":1}
//! ```

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Service type every SOS-Link advertiser registers.
pub const SERVICE_TYPE: &str = "_emergencyapp._tcp";

/// Instance name of the advertised service.
pub const SERVICE_NAME: &str = "EmergencyApp";

/// Version carried in announcements so future payload changes can be gated.
pub const DISCOVERY_PROTOCOL_VERSION: u8 = 1;

/// UDP port discovery datagrams are exchanged on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 24870;

/// Upper bound for a datagram we are willing to parse.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryDatagram {
    /// Sent by a browser looking for advertisers of `service_type`.
    Query {
        #[serde(rename = "serviceType")]
        service_type: String,
    },
    /// Sent by an advertiser in reply to a query.
    Announce {
        #[serde(rename = "serviceType")]
        service_type: String,
        #[serde(rename = "instanceName")]
        instance_name: String,
        port: u16,
        #[serde(rename = "protocolVersion")]
        protocol_version: u8,
    },
}

impl DiscoveryDatagram {
    pub fn query(service_type: &str) -> Self {
        Self::Query {
            service_type: service_type.to_string(),
        }
    }

    pub fn announce(service_type: &str, instance_name: &str, port: u16) -> Self {
        Self::Announce {
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
            port,
            protocol_version: DISCOVERY_PROTOCOL_VERSION,
        }
    }

    /// Service type the datagram refers to.
    pub fn service_type(&self) -> &str {
        match self {
            Self::Query { service_type } | Self::Announce { service_type, .. } => service_type,
        }
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedDatagram`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::MalformedDatagram(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedDatagram`] for oversized or
    /// unparseable input.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::MalformedDatagram(format!(
                "{} bytes exceeds {MAX_DATAGRAM_SIZE}",
                bytes.len()
            )));
        }
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedDatagram(e.to_string()))
    }
}
