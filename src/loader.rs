//! Zone loading from master files and AXFR transfers.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::txt::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::LoadError;
use crate::metrics::{self, Timer};
use crate::zone::{Zone, ZoneBuilder, ZoneSource};

/// Default DNS port for transfer endpoints given without one.
const DNS_PORT: u16 = 53;

/// Builds zones for the control channel's `READ` and `READXFR` commands.
#[async_trait]
pub trait ZoneLoader: Send + Sync {
    /// Parse a master file for `origin`.
    async fn load_from_file(&self, origin: &Name, path: &Path) -> Result<Zone, LoadError>;

    /// Transfer `origin` from a remote primary.
    async fn load_from_transfer(&self, origin: &Name, endpoint: &str) -> Result<Zone, LoadError>;
}

/// Loader backed by hickory's master file parser and a plain AXFR client.
#[derive(Debug, Clone)]
pub struct DefaultZoneLoader {
    transfer_timeout: Duration,
}

impl Default for DefaultZoneLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl DefaultZoneLoader {
    /// Create a loader whose transfers give up after `transfer_timeout`.
    pub fn new(transfer_timeout: Duration) -> Self {
        Self { transfer_timeout }
    }

    fn parse_master(origin: &Name, path: &Path, text: String) -> Result<Zone, LoadError> {
        let (_, records) = Parser::new(text, Some(path.to_path_buf()), Some(origin.clone()))
            .parse()
            .map_err(|e| LoadError::Parse(e.to_string()))?;

        let mut builder = ZoneBuilder::new(origin);
        for rrset in records.values() {
            builder.extend(rrset.records_without_rrsigs().cloned())?;
        }
        builder.build(ZoneSource::File(path.to_path_buf()))
    }

    async fn transfer(&self, origin: &Name, endpoint: &str) -> Result<Zone, LoadError> {
        let target = transfer_target(endpoint);
        let mut stream = TcpStream::connect(&target).await?;

        let mut request = Message::new();
        request.set_id(transfer_id());
        request.set_message_type(MessageType::Query);
        request.set_op_code(OpCode::Query);
        request.add_query(Query::query(origin.clone(), RecordType::AXFR));
        let bytes = request.to_vec()?;
        stream.write_u16(bytes.len() as u16).await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;

        let mut builder = ZoneBuilder::new(origin);
        let mut soa_seen = 0;
        let mut messages = 0;
        while soa_seen < 2 {
            let len = stream.read_u16().await? as usize;
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            let response = Message::from_vec(&buf)?;
            messages += 1;

            if response.id() != request.id() {
                return Err(LoadError::Transfer(format!(
                    "unexpected message id {}",
                    response.id()
                )));
            }
            if response.response_code() != ResponseCode::NoError {
                return Err(LoadError::Transfer(format!(
                    "{target} answered {}",
                    response.response_code()
                )));
            }
            if response.answers().is_empty() {
                return Err(LoadError::Transfer(format!("{target} sent an empty message")));
            }

            for record in response.answers() {
                if record.record_type() == RecordType::SOA {
                    soa_seen += 1;
                    if soa_seen == 2 {
                        break;
                    }
                }
                if soa_seen == 0 {
                    return Err(LoadError::Transfer("transfer did not start with SOA".into()));
                }
                builder.add(record.clone())?;
            }
        }

        debug!(%origin, %target, messages, "zone transfer complete");
        builder.build(ZoneSource::Transfer(endpoint.to_string()))
    }
}

#[async_trait]
impl ZoneLoader for DefaultZoneLoader {
    async fn load_from_file(&self, origin: &Name, path: &Path) -> Result<Zone, LoadError> {
        let timer = Timer::start();
        let result = match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse_master(origin, path, text),
            Err(e) => Err(e.into()),
        };
        metrics::record_zone_load("file", result.is_ok(), timer.elapsed());
        if let Ok(zone) = &result {
            info!(origin = %zone.origin(), path = %path.display(), serial = ?zone.serial(), "loaded zone file");
        }
        result
    }

    async fn load_from_transfer(&self, origin: &Name, endpoint: &str) -> Result<Zone, LoadError> {
        let timer = Timer::start();
        let result = tokio::time::timeout(self.transfer_timeout, self.transfer(origin, endpoint))
            .await
            .unwrap_or_else(|_| Err(LoadError::Timeout(endpoint.to_string())));
        metrics::record_zone_load("transfer", result.is_ok(), timer.elapsed());
        if let Ok(zone) = &result {
            info!(origin = %zone.origin(), %endpoint, serial = ?zone.serial(), "transferred zone");
        }
        result
    }
}

/// `endpoint` with the DNS port added when it names none. Bare IPv6
/// addresses are bracketed.
fn transfer_target(endpoint: &str) -> String {
    if endpoint.parse::<SocketAddr>().is_ok() {
        return endpoint.to_string();
    }
    if let Ok(ip) = endpoint.parse::<IpAddr>() {
        return SocketAddr::new(ip, DNS_PORT).to_string();
    }
    match endpoint.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => endpoint.to_string(),
        _ => format!("{endpoint}:{DNS_PORT}"),
    }
}

fn transfer_id() -> u16 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u16)
        .unwrap_or_default()
}
