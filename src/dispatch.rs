//! Wire-level request handling shared by the UDP and TCP listeners.

use hickory_proto::op::{Header, Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::DNSClass;
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::control::{ControlProtocol, ControlReply};
use crate::metrics::{self, QueryResult, Timer};
use crate::registry::ZoneRegistry;
use crate::reply;
use crate::resolver::Resolver;
use crate::tsig::{self, SignedMessage};

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Datagram.
    Udp,
    /// Length-prefixed stream.
    Tcp,
}

impl Transport {
    /// Label value used on metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

/// Routes raw requests to the control channel or the resolver.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ZoneRegistry,
    resolver: Resolver,
    control: ControlProtocol,
}

impl Dispatcher {
    /// Create a dispatcher over the shared registry.
    pub fn new(registry: ZoneRegistry, resolver: Resolver, control: ControlProtocol) -> Self {
        Self {
            registry,
            resolver,
            control,
        }
    }

    /// Handle one request. `None` means nothing is sent back.
    pub async fn handle(
        &self,
        bytes: &[u8],
        src: SocketAddr,
        transport: Transport,
    ) -> Option<Vec<u8>> {
        let signed = match SignedMessage::read(bytes) {
            Ok(signed) => signed,
            Err(e) => {
                debug!(%src, error = %e, "malformed request records");
                return self.malformed(bytes, src, transport);
            }
        };

        let request = match Message::from_vec(bytes) {
            Ok(request) => request,
            Err(e) => {
                debug!(%src, transport = transport.as_str(), error = %e, "dropping undecodable request");
                metrics::record_undecodable(transport.as_str());
                return None;
            }
        };
        if request.message_type() != MessageType::Query {
            debug!(%src, id = request.id(), "ignoring response message");
            return None;
        }

        let reply = self.route(&request, signed.as_ref()).await;
        encode(reply, src)
    }

    async fn route(&self, request: &Message, signed: Option<&SignedMessage>) -> ControlReply {
        let Some(query) = request.queries().first() else {
            return ControlReply::Unsigned(format_error(request));
        };

        match query.query_class() {
            DNSClass::CH => self.control.handle(request, signed).await,
            DNSClass::IN => match self.registry.find_zone(query.name()) {
                Some(zone) => ControlReply::Unsigned(self.resolver.resolve(request, &zone).message),
                None => ControlReply::Unsigned(self.resolver.unbound(request).message),
            },
            class => {
                debug!(name = %query.name(), ?class, "no zones in class");
                ControlReply::Unsigned(format_error(request))
            }
        }
    }

    /// Answer FORMERR when the header and question decode but the records
    /// after them do not.
    fn malformed(&self, bytes: &[u8], src: SocketAddr, transport: Transport) -> Option<Vec<u8>> {
        let mut decoder = BinDecoder::new(bytes);
        let header = match Header::read(&mut decoder) {
            Ok(header) if header.message_type() == MessageType::Query => header,
            _ => {
                metrics::record_undecodable(transport.as_str());
                return None;
            }
        };

        let mut request = Message::new();
        request.set_id(header.id());
        request.set_op_code(header.op_code());
        request.set_recursion_desired(header.recursion_desired());
        if header.query_count() > 0 {
            if let Ok(query) = Query::read(&mut decoder) {
                request.add_query(query);
            }
        }
        metrics::record_control_rejected("signature");
        encode(
            ControlReply::Unsigned(reply::error_reply(&request, ResponseCode::FormErr)),
            src,
        )
    }
}

/// FORMERR for a request with no question or an unserved class.
fn format_error(request: &Message) -> Message {
    let timer = Timer::start();
    let mut response = reply::error_reply(request, ResponseCode::FormErr);
    reply::echo_edns(request, &mut response);
    let rtype = request
        .queries()
        .first()
        .map(|q| format!("{:?}", q.query_type()))
        .unwrap_or_else(|| "none".to_string());
    metrics::record_query(&rtype, QueryResult::FormErr, timer.elapsed());
    response
}

fn encode(reply: ControlReply, src: SocketAddr) -> Option<Vec<u8>> {
    match reply {
        ControlReply::Unsigned(message) => match message.to_vec() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(%src, id = message.id(), error = %e, "failed to encode response");
                None
            }
        },
        ControlReply::Signed(message, signer) => match signer.sign(&message, tsig::now()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(%src, key = %signer.key_name(), error = %e, "failed to sign response");
                None
            }
        },
    }
}
