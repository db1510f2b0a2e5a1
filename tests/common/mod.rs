//! Shared test infrastructure for fksd integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use tempfile::NamedTempFile;

use fksd::tsig::{self, ResponseSigner, SignedMessage, TsigAlgorithm};
use fksd::{
    AuthModel, ControlProtocol, DefaultZoneLoader, Dispatcher, Resolver, Transport, ZoneRegistry,
};

// --- Constants ---

pub const SUPERUSER: &str = "root.";
pub const SUPERUSER_KEY: &str = "c3R1cGlk";
pub const ALICE: &str = "alice.";
pub const ALICE_KEY: &str = "YWxpY2Utc2VjcmV0";

pub const EXAMPLE_ZONE: &str = "\
$ORIGIN example.
$TTL 300
@        IN SOA   ns1.example. hostmaster.example. 2024010101 3600 600 604800 60
@        IN NS    ns1.example.
ns1      IN A     192.0.2.1
www      IN A     192.0.2.10
www      IN AAAA  2001:db8::10
alias    IN CNAME www.example.
*        IN TXT   \"wildcard\"
sub      IN NS    ns.sub.example.
sub      IN NS    ns.elsewhere.test.
ns.sub   IN A     192.0.2.53
ns.sub   IN AAAA  2001:db8::53
host.sub IN A     192.0.2.54
";

// --- Fixtures ---

/// Write master file text to a temp file that lives as long as the handle.
pub fn write_zone(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

pub fn name(s: &str) -> Name {
    Name::from_ascii(s).unwrap()
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, class: DNSClass, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(class);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// A `SUBSYSTEM. CH TXT "text"` command record.
pub fn command(owner: &str, text: &str) -> Record {
    let mut record = Record::from_rdata(name(owner), 0, RData::TXT(TXT::new(vec![text.to_string()])));
    record.set_dns_class(DNSClass::CH);
    record
}

/// Build an UPDATE message carrying `commands` in the update section.
pub fn build_update(commands: Vec<Record>, id: u16) -> Message {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Update);
    let mut zone = Query::query(name("ZONE."), RecordType::SOA);
    zone.set_query_class(DNSClass::CH);
    msg.add_query(zone);
    msg.add_name_servers(commands);
    msg
}

/// Sign `msg` at `time_signed`; returns the wire bytes and the request MAC.
pub fn sign_at(msg: &Message, key: &str, secret: &str, time_signed: u64) -> (Vec<u8>, Vec<u8>) {
    let signer =
        ResponseSigner::for_request(&name(key), TsigAlgorithm::HmacSha256, secret, 300).unwrap();
    let bytes = signer.sign(msg, time_signed).unwrap();
    let mac = SignedMessage::read(&bytes)
        .unwrap()
        .unwrap()
        .mac()
        .to_vec();
    (bytes, mac)
}

/// Sign `msg` with the current time.
pub fn sign(msg: &Message, key: &str, secret: &str) -> (Vec<u8>, Vec<u8>) {
    sign_at(msg, key, secret, tsig::now())
}

/// A decoded reply and whether it carried a valid signature.
pub struct Reply {
    pub message: Message,
    pub signed: bool,
}

/// Decode reply bytes, verifying the signature against `secret` if present.
pub fn decode_reply(bytes: &[u8], secret: &str, request_mac: &[u8]) -> Reply {
    match SignedMessage::read(bytes).unwrap() {
        Some(signed) => {
            signed
                .verify_response(secret, request_mac, tsig::now())
                .expect("reply signature does not verify");
            Reply {
                message: Message::from_vec(bytes).unwrap(),
                signed: true,
            }
        }
        None => Reply {
            message: Message::from_vec(bytes).unwrap(),
            signed: false,
        },
    }
}

// --- Harness ---

/// In-process server: shared state plus a dispatcher over it.
pub struct TestHarness {
    pub registry: ZoneRegistry,
    pub auth: AuthModel,
    pub dispatcher: Dispatcher,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_enforcement(false)
    }

    pub fn with_enforcement(enforce: bool) -> Self {
        let registry = ZoneRegistry::new();
        let auth = AuthModel::new(&name(SUPERUSER), SUPERUSER_KEY);
        let control = ControlProtocol::new(
            registry.clone(),
            auth.clone(),
            Arc::new(DefaultZoneLoader::default()),
        )
        .with_enforce_capabilities(enforce);
        let dispatcher = Dispatcher::new(registry.clone(), Resolver::default(), control);
        Self {
            registry,
            auth,
            dispatcher,
        }
    }

    pub fn src() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Send raw bytes; panics if nothing comes back.
    pub async fn raw(&self, bytes: &[u8]) -> Vec<u8> {
        self.dispatcher
            .handle(bytes, Self::src(), Transport::Udp)
            .await
            .expect("no reply")
    }

    /// Ordinary IN-class query.
    pub async fn query(&self, qname: &str, record_type: RecordType) -> Message {
        let bytes = build_query_bytes(qname, record_type, DNSClass::IN, 1);
        Message::from_vec(&self.raw(&bytes).await).unwrap()
    }

    /// Signed control request.
    pub async fn control(&self, key: &str, secret: &str, commands: Vec<Record>) -> Reply {
        let msg = build_update(commands, 2);
        let (bytes, mac) = sign(&msg, key, secret);
        decode_reply(&self.raw(&bytes).await, secret, &mac)
    }

    /// Signed control request as the superuser.
    pub async fn admin(&self, commands: Vec<Record>) -> Reply {
        self.control(SUPERUSER, SUPERUSER_KEY, commands).await
    }
}

// --- Response helpers ---

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Origins listed by a `ZONE LIST` reply.
pub fn listed_zones(msg: &Message) -> Vec<String> {
    msg.additionals()
        .iter()
        .filter_map(|r| match r.data() {
            RData::TXT(txt) => Some(
                txt.txt_data()
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
        .collect()
}
