//! Authenticated control channel on the CHAOS class.
//!
//! Commands travel as TXT records in the update section of a signed UPDATE
//! message, owned by `ZONE.` or `USER.`:
//!
//! ```text
//! ZONE. CH TXT "READ example. /srv/zones/example.zone"
//! ZONE. CH TXT "READXFR example. 192.0.2.1:53"
//! ZONE. CH TXT "DROP example."
//! ZONE. CH TXT "LIST"
//! USER. CH TXT "ADD alice. c2VjcmV0"
//! USER. CH TXT "DROP alice."
//! USER. CH TXT "LIST"
//! USER. CH TXT "ADDPOWER alice. write drop"
//! USER. CH TXT "DROPPOWER alice. drop"
//! ```
//!
//! Commands are applied in order. The first failure stops the batch and the
//! request is answered FORMERR; commands applied before it stay applied.
//! An unsigned UPDATE, or an unsigned request with a non-empty update
//! section, is answered FORMERR without touching any state.

use hickory_proto::op::{Message, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{PTR, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{normalize_identity, AuthModel, Capabilities};
use crate::error::{ControlError, TsigError};
use crate::loader::ZoneLoader;
use crate::metrics::{self, ControlOutcome};
use crate::registry::ZoneRegistry;
use crate::reply;
use crate::tsig::{self, ResponseSigner, SignedMessage};

/// Owner name of zone commands and listings.
pub const ZONE_SUBSYSTEM: &str = "ZONE.";
/// Owner name of user commands.
pub const USER_SUBSYSTEM: &str = "USER.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subsystem {
    Zone,
    User,
}

impl Subsystem {
    fn as_str(self) -> &'static str {
        match self {
            Subsystem::Zone => "zone",
            Subsystem::User => "user",
        }
    }
}

fn subsystem_of(name: &Name) -> Option<Subsystem> {
    let mut name = name.clone();
    name.set_fqdn(true);
    let name = name.to_ascii();
    if name.eq_ignore_ascii_case(ZONE_SUBSYSTEM) {
        Some(Subsystem::Zone)
    } else if name.eq_ignore_ascii_case(USER_SUBSYSTEM) {
        Some(Subsystem::User)
    } else {
        None
    }
}

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load a zone from a master file.
    ZoneRead { origin: Name, path: PathBuf },
    /// Load a zone by AXFR from a primary.
    ZoneReadXfr { origin: Name, endpoint: String },
    /// Remove a zone.
    ZoneDrop { origin: Name },
    /// List loaded origins in the additional section.
    ZoneList,
    /// Add or re-key a user.
    UserAdd { identity: Name, secret: String },
    /// Remove a user.
    UserDrop { identity: Name },
    /// Log known users.
    UserList,
    /// Grant capability bits; `None` is an acknowledged no-op.
    UserAddPower(Option<(Name, Capabilities)>),
    /// Revoke capability bits; `None` is an acknowledged no-op.
    UserDropPower(Option<(Name, Capabilities)>),
}

impl Command {
    fn verb(&self) -> &'static str {
        match self {
            Command::ZoneRead { .. } => "read",
            Command::ZoneReadXfr { .. } => "readxfr",
            Command::ZoneDrop { .. } | Command::UserDrop { .. } => "drop",
            Command::ZoneList | Command::UserList => "list",
            Command::UserAdd { .. } => "add",
            Command::UserAddPower(_) => "addpower",
            Command::UserDropPower(_) => "droppower",
        }
    }

    /// Capability a `ZONE` command needs when enforcement is on.
    fn required(&self) -> Option<Capabilities> {
        match self {
            Command::ZoneRead { .. } | Command::ZoneReadXfr { .. } => Some(Capabilities::WRITE),
            Command::ZoneDrop { .. } => Some(Capabilities::DROP),
            Command::ZoneList => Some(Capabilities::LIST),
            Command::UserAdd { .. }
            | Command::UserDrop { .. }
            | Command::UserList
            | Command::UserAddPower(_)
            | Command::UserDropPower(_) => None,
        }
    }
}

fn parse_name(token: &str) -> Result<Name, ControlError> {
    Name::from_ascii(token)
        .map(|name| normalize_identity(&name))
        .map_err(|_| ControlError::InvalidName(token.to_string()))
}

fn parse_power(tokens: &[&str]) -> Result<Option<Option<(Name, Capabilities)>>, ControlError> {
    match tokens {
        [] => Ok(Some(None)),
        [_] => Ok(None),
        [identity, powers @ ..] => {
            let mut caps = Capabilities::empty();
            for power in powers {
                caps |= Capabilities::from_power(power)
                    .ok_or_else(|| ControlError::UnknownPower(power.to_string()))?;
            }
            Ok(Some(Some((parse_name(identity)?, caps))))
        }
    }
}

/// Parse command text. `Ok(None)` means malformed text that is skipped.
fn parse_command(subsystem: Subsystem, text: &str) -> Result<Option<Command>, ControlError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let Some((verb, args)) = tokens.split_first() else {
        return Ok(None);
    };
    let verb = verb.to_ascii_uppercase();

    let command = match (subsystem, verb.as_str(), args) {
        (Subsystem::Zone, "READ", [origin, path]) => Command::ZoneRead {
            origin: parse_name(origin)?,
            path: PathBuf::from(path),
        },
        (Subsystem::Zone, "READXFR", [origin, endpoint]) => Command::ZoneReadXfr {
            origin: parse_name(origin)?,
            endpoint: endpoint.to_string(),
        },
        (Subsystem::Zone, "DROP", [origin]) => Command::ZoneDrop {
            origin: parse_name(origin)?,
        },
        (Subsystem::Zone, "LIST", []) => Command::ZoneList,
        (Subsystem::User, "ADD", [identity, secret]) => Command::UserAdd {
            identity: parse_name(identity)?,
            secret: secret.to_string(),
        },
        (Subsystem::User, "DROP", [identity]) => Command::UserDrop {
            identity: parse_name(identity)?,
        },
        (Subsystem::User, "LIST", []) => Command::UserList,
        (Subsystem::User, "ADDPOWER", args) => match parse_power(args)? {
            Some(grant) => Command::UserAddPower(grant),
            None => return Ok(None),
        },
        (Subsystem::User, "DROPPOWER", args) => match parse_power(args)? {
            Some(revoke) => Command::UserDropPower(revoke),
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(command))
}

/// TXT character strings joined with single spaces.
fn command_text(txt: &TXT) -> String {
    txt.txt_data()
        .iter()
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reply produced by the control channel.
#[derive(Debug)]
pub enum ControlReply {
    /// Sent as is.
    Unsigned(Message),
    /// Signed with the requester's key before it is sent.
    Signed(Message, ResponseSigner),
}

impl ControlReply {
    /// The reply message.
    pub fn message(&self) -> &Message {
        match self {
            ControlReply::Unsigned(message) | ControlReply::Signed(message, _) => message,
        }
    }
}

/// Control channel handler shared by all listeners.
#[derive(Clone)]
pub struct ControlProtocol {
    registry: ZoneRegistry,
    auth: AuthModel,
    loader: Arc<dyn ZoneLoader>,
    enforce_capabilities: bool,
    max_fudge: u16,
}

impl std::fmt::Debug for ControlProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlProtocol")
            .field("zones", &self.registry.len())
            .field("users", &self.auth.len())
            .field("enforce_capabilities", &self.enforce_capabilities)
            .field("max_fudge", &self.max_fudge)
            .finish()
    }
}

impl ControlProtocol {
    /// Create a handler over shared state.
    pub fn new(registry: ZoneRegistry, auth: AuthModel, loader: Arc<dyn ZoneLoader>) -> Self {
        Self {
            registry,
            auth,
            loader,
            enforce_capabilities: false,
            max_fudge: tsig::DEFAULT_FUDGE,
        }
    }

    /// Require capability bits for `ZONE` commands.
    pub fn with_enforce_capabilities(mut self, enforce: bool) -> Self {
        self.enforce_capabilities = enforce;
        self
    }

    /// Largest clock skew accepted from a signer, whatever fudge it asks for.
    pub fn with_max_fudge(mut self, fudge: u16) -> Self {
        self.max_fudge = fudge;
        self
    }

    /// Handle a CH-class request. `signed` is the request's trailing
    /// signature, if it carried one.
    pub async fn handle(&self, request: &Message, signed: Option<&SignedMessage>) -> ControlReply {
        let Some(signed) = signed else {
            if request.op_code() == OpCode::Update || !request.name_servers().is_empty() {
                let e = ControlError::from(TsigError::Unsigned);
                warn!(id = request.id(), error = %e, "control update rejected");
                metrics::record_control_rejected("unsigned");
                return ControlReply::Unsigned(reply::error_reply(request, ResponseCode::FormErr));
            }
            return match self.directory(request) {
                Ok(response) => ControlReply::Unsigned(response),
                Err(e) => {
                    debug!(error = %e, "directory query refused");
                    metrics::record_control_rejected("directory");
                    ControlReply::Unsigned(reply::error_reply(request, ResponseCode::FormErr))
                }
            };
        };

        let (identity, signer) = match self.verify(signed) {
            Ok(verified) => verified,
            Err(e) => {
                warn!(key = %signed.key_name(), error = %e, "control signature rejected");
                metrics::record_control_rejected("signature");
                return ControlReply::Unsigned(reply::error_reply(request, ResponseCode::FormErr));
            }
        };

        if request.op_code() != OpCode::Update {
            let e = ControlError::NotUpdate;
            debug!(%identity, op = ?request.op_code(), error = %e, "control request refused");
            metrics::record_control_rejected("not_update");
            return ControlReply::Signed(
                reply::error_reply(request, ResponseCode::FormErr),
                signer,
            );
        }

        let mut response = reply::reply_to(request);
        match self.run_batch(&identity, request, &mut response).await {
            Ok(()) => {
                reply::echo_edns(request, &mut response);
                ControlReply::Signed(response, signer)
            }
            Err(e) => {
                warn!(%identity, error = %e, "control request failed");
                ControlReply::Signed(reply::error_reply(request, ResponseCode::FormErr), signer)
            }
        }
    }

    /// Check the signature against the signer's secret. Returns the
    /// normalized identity and a signer for the reply.
    fn verify(&self, signed: &SignedMessage) -> Result<(Name, ResponseSigner), ControlError> {
        let identity = normalize_identity(signed.key_name());
        let secret = self
            .auth
            .secret(&identity)
            .ok_or_else(|| TsigError::UnknownKey(identity.clone()))?;
        let signer = signed.verify(&secret, tsig::now(), self.max_fudge)?;
        Ok((identity, signer))
    }

    /// Unauthenticated listing: `ZONE.` answers one PTR per loaded origin.
    fn directory(&self, request: &Message) -> Result<Message, ControlError> {
        let query = request
            .queries()
            .first()
            .ok_or_else(|| ControlError::NoDirectory(Name::root()))?;
        if subsystem_of(query.name()) != Some(Subsystem::Zone) {
            return Err(ControlError::NoDirectory(query.name().clone()));
        }

        let owner = zone_owner();
        let mut response = reply::reply_to(request);
        for origin in self.registry.origins() {
            let mut record = Record::from_rdata(owner.clone(), 0, RData::PTR(PTR(origin)));
            record.set_dns_class(DNSClass::CH);
            response.add_answer(record);
        }
        reply::echo_edns(request, &mut response);
        Ok(response)
    }

    async fn run_batch(
        &self,
        identity: &Name,
        request: &Message,
        response: &mut Message,
    ) -> Result<(), ControlError> {
        for record in request.name_servers() {
            let RData::TXT(txt) = record.data() else {
                return Err(ControlError::NotText(record.name().clone()));
            };
            let subsystem = subsystem_of(record.name())
                .ok_or_else(|| ControlError::UnknownSubsystem(record.name().clone()))?;

            if subsystem == Subsystem::User && !self.auth.is_superuser(identity) {
                metrics::record_control_rejected("not_superuser");
                return Err(ControlError::NotSuperuser(identity.clone()));
            }

            let text = command_text(txt);
            let command = match parse_command(subsystem, &text) {
                Ok(Some(command)) => command,
                Ok(None) => {
                    debug!(%identity, subsystem = subsystem.as_str(), %text, "skipping malformed command");
                    metrics::record_control_command(subsystem.as_str(), "unknown", ControlOutcome::Skipped);
                    continue;
                }
                Err(e) => {
                    metrics::record_control_command(subsystem.as_str(), "unknown", ControlOutcome::Failed);
                    return Err(e);
                }
            };

            let verb = command.verb();
            match self.apply(identity, command, response).await {
                Ok(()) => {
                    metrics::record_control_command(subsystem.as_str(), verb, ControlOutcome::Applied)
                }
                Err(e) => {
                    metrics::record_control_command(subsystem.as_str(), verb, ControlOutcome::Failed);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        identity: &Name,
        command: Command,
        response: &mut Message,
    ) -> Result<(), ControlError> {
        if self.enforce_capabilities {
            if let Some(required) = command.required() {
                self.auth.authorize(identity, required)?;
            }
        }

        match command {
            Command::ZoneRead { origin, path } => {
                let zone = self.loader.load_from_file(&origin, &path).await?;
                let replaced = self.registry.insert(zone).is_some();
                info!(%identity, %origin, path = %path.display(), replaced, "zone read");
            }
            Command::ZoneReadXfr { origin, endpoint } => {
                let zone = self.loader.load_from_transfer(&origin, &endpoint).await?;
                let replaced = self.registry.insert(zone).is_some();
                info!(%identity, %origin, %endpoint, replaced, "zone transferred");
            }
            Command::ZoneDrop { origin } => {
                self.registry
                    .remove(&origin)
                    .ok_or_else(|| ControlError::NoSuchZone(origin.clone()))?;
                info!(%identity, %origin, "zone dropped");
            }
            Command::ZoneList => {
                let owner = zone_owner();
                for origin in self.registry.origins() {
                    let txt = TXT::new(vec![origin.to_string()]);
                    let mut record = Record::from_rdata(owner.clone(), 0, RData::TXT(txt));
                    record.set_dns_class(DNSClass::CH);
                    response.add_additional(record);
                }
                debug!(%identity, zones = self.registry.len(), "zone list");
            }
            Command::UserAdd {
                identity: user,
                secret,
            } => {
                self.auth.add_user(&user, &secret)?;
                info!(%identity, %user, "user added");
            }
            Command::UserDrop { identity: user } => {
                self.auth.drop_user(&user)?;
                info!(%identity, %user, "user dropped");
            }
            Command::UserList => {
                for user in self.auth.users() {
                    let rights = self.auth.capabilities(&user);
                    info!(%user, ?rights, "user");
                }
            }
            Command::UserAddPower(None) | Command::UserDropPower(None) => {
                debug!(%identity, "power command without arguments");
            }
            Command::UserAddPower(Some((user, caps))) => {
                let rights = self.auth.grant(&user, caps)?;
                info!(%identity, %user, ?rights, "capabilities granted");
            }
            Command::UserDropPower(Some((user, caps))) => {
                let rights = self.auth.revoke(&user, caps)?;
                info!(%identity, %user, ?rights, "capabilities revoked");
            }
        }
        Ok(())
    }
}

fn zone_owner() -> Name {
    Name::from_ascii(ZONE_SUBSYSTEM).unwrap_or_else(|_| Name::root())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::tsig::TsigAlgorithm;
    use crate::zone::tests::{example_zone, name, soa};
    use crate::zone::{Zone, ZoneBuilder, ZoneSource};
    use async_trait::async_trait;
    use hickory_proto::op::Query;
    use hickory_proto::rr::RecordType;
    use std::path::Path;

    const ROOT_KEY: &str = "c3R1cGlk";
    const ALICE_KEY: &str = "YWxpY2Utc2VjcmV0";

    /// Serves `example.` for any path except ones containing "missing".
    struct FixtureLoader;

    #[async_trait]
    impl ZoneLoader for FixtureLoader {
        async fn load_from_file(&self, origin: &Name, path: &Path) -> Result<Zone, LoadError> {
            if path.to_string_lossy().contains("missing") {
                return Err(LoadError::Io(std::io::Error::from(
                    std::io::ErrorKind::NotFound,
                )));
            }
            if origin == &name("example.") {
                return Ok(example_zone());
            }
            let mut builder = ZoneBuilder::new(origin);
            builder.add(soa(&origin.to_string()))?;
            builder.build(ZoneSource::File(path.to_path_buf()))
        }

        async fn load_from_transfer(&self, origin: &Name, endpoint: &str) -> Result<Zone, LoadError> {
            let mut builder = ZoneBuilder::new(origin);
            builder.add(soa(&origin.to_string()))?;
            builder.build(ZoneSource::Transfer(endpoint.to_string()))
        }
    }

    fn protocol() -> (ControlProtocol, ZoneRegistry, AuthModel) {
        let registry = ZoneRegistry::new();
        let auth = AuthModel::new(&name("root."), ROOT_KEY);
        let control = ControlProtocol::new(registry.clone(), auth.clone(), Arc::new(FixtureLoader));
        (control, registry, auth)
    }

    fn command(owner: &str, text: &str) -> Record {
        let mut record = Record::from_rdata(
            name(owner),
            0,
            RData::TXT(TXT::new(vec![text.to_string()])),
        );
        record.set_dns_class(DNSClass::CH);
        record
    }

    fn update(commands: Vec<Record>) -> Message {
        let mut msg = Message::new();
        msg.set_id(99);
        msg.set_op_code(OpCode::Update);
        let mut query = Query::query(name("ZONE."), RecordType::SOA);
        query.set_query_class(DNSClass::CH);
        msg.add_query(query);
        msg.add_name_servers(commands);
        msg
    }

    fn sign(msg: &Message, key: &str, secret: &str) -> SignedMessage {
        let signer =
            ResponseSigner::for_request(&name(key), TsigAlgorithm::HmacSha256, secret, 300).unwrap();
        let bytes = signer.sign(msg, tsig::now()).unwrap();
        SignedMessage::read(&bytes).unwrap().unwrap()
    }

    async fn send(
        control: &ControlProtocol,
        key: &str,
        secret: &str,
        commands: Vec<Record>,
    ) -> ControlReply {
        let msg = update(commands);
        let signed = sign(&msg, key, secret);
        control.handle(&msg, Some(&signed)).await
    }

    fn rcode(reply: &ControlReply) -> ResponseCode {
        reply.message().response_code()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command(Subsystem::Zone, "read Example /z/example.zone").unwrap(),
            Some(Command::ZoneRead {
                origin: name("example."),
                path: PathBuf::from("/z/example.zone"),
            })
        );
        assert_eq!(
            parse_command(Subsystem::User, "ADDPOWER").unwrap(),
            Some(Command::UserAddPower(None))
        );
        assert_eq!(
            parse_command(Subsystem::User, "DROPPOWER alice. write drop").unwrap(),
            Some(Command::UserDropPower(Some((
                name("alice."),
                Capabilities::WRITE | Capabilities::DROP
            ))))
        );
        assert!(parse_command(Subsystem::User, "ADDPOWER alice. fly").is_err());
    }

    #[test]
    fn test_malformed_text_is_skipped() {
        for text in ["", "READ example.", "DROP", "FROB example.", "LIST extra"] {
            assert_eq!(parse_command(Subsystem::Zone, text).unwrap(), None, "{text:?}");
        }
        assert_eq!(parse_command(Subsystem::User, "ADDPOWER alice.").unwrap(), None);
    }

    #[test]
    fn test_reserved_names_are_case_insensitive() {
        assert_eq!(subsystem_of(&name("zone.")), Some(Subsystem::Zone));
        assert_eq!(subsystem_of(&name("User.")), Some(Subsystem::User));
        assert_eq!(subsystem_of(&name("zone.example.")), None);
    }

    #[tokio::test]
    async fn test_zone_lifecycle() {
        let (control, registry, _) = protocol();

        let reply = send(&control, "root.", ROOT_KEY, vec![command("ZONE.", "READ example. /z/example")]).await;
        assert_eq!(rcode(&reply), ResponseCode::NoError);
        assert!(matches!(reply, ControlReply::Signed(..)));
        assert!(registry.contains(&name("example.")));

        let reply = send(&control, "root.", ROOT_KEY, vec![command("ZONE.", "LIST")]).await;
        let listed = reply.message().additionals();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].dns_class(), DNSClass::CH);
        match listed[0].data() {
            RData::TXT(txt) => assert_eq!(command_text(txt), "example."),
            other => panic!("unexpected {other:?}"),
        }

        let reply = send(&control, "root.", ROOT_KEY, vec![command("ZONE.", "DROP example.")]).await;
        assert_eq!(rcode(&reply), ResponseCode::NoError);
        assert!(registry.is_empty());

        let reply = send(&control, "root.", ROOT_KEY, vec![command("ZONE.", "LIST")]).await;
        assert!(reply.message().additionals().is_empty());
    }

    #[tokio::test]
    async fn test_double_read_keeps_one_entry() {
        let (control, registry, _) = protocol();
        for _ in 0..2 {
            let reply = send(&control, "root.", ROOT_KEY, vec![command("ZONE.", "READ example. /z/example")]).await;
            assert_eq!(rcode(&reply), ResponseCode::NoError);
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_missing_zone_is_format_error() {
        let (control, _, _) = protocol();
        let reply = send(&control, "root.", ROOT_KEY, vec![command("ZONE.", "DROP nowhere.")]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(matches!(reply, ControlReply::Signed(..)));
    }

    #[tokio::test]
    async fn test_failed_load_leaves_registry_unchanged() {
        let (control, registry, _) = protocol();
        let reply = send(&control, "root.", ROOT_KEY, vec![command("ZONE.", "READ example. /z/missing")]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let (control, registry, _) = protocol();
        let reply = send(
            &control,
            "root.",
            ROOT_KEY,
            vec![
                command("ZONE.", "READXFR one.test. 192.0.2.1"),
                command("ZONE.", "DROP nowhere."),
                command("ZONE.", "READXFR two.test. 192.0.2.1"),
            ],
        )
        .await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(registry.contains(&name("one.test.")));
        assert!(!registry.contains(&name("two.test.")));
    }

    #[tokio::test]
    async fn test_non_txt_command_rejects_request() {
        let (control, registry, _) = protocol();
        let mut bogus = Record::from_rdata(
            name("ZONE."),
            0,
            RData::PTR(PTR(name("example."))),
        );
        bogus.set_dns_class(DNSClass::CH);
        let reply = send(&control, "root.", ROOT_KEY, vec![bogus]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_subsystem_rejects_request() {
        let (control, _, _) = protocol();
        let reply = send(&control, "root.", ROOT_KEY, vec![command("FROB.", "LIST")]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
    }

    #[tokio::test]
    async fn test_user_commands_are_superuser_only() {
        let (control, _, auth) = protocol();
        auth.add_user(&name("alice."), ALICE_KEY).unwrap();

        let reply = send(&control, "alice.", ALICE_KEY, vec![command("USER.", "ADD mallory. bWFsbG9yeQ==")]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(auth.secret(&name("mallory.")).is_none());

        // Checked before parsing: even malformed text is refused.
        let reply = send(&control, "alice.", ALICE_KEY, vec![command("USER.", "NONSENSE")]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
    }

    #[tokio::test]
    async fn test_added_user_can_sign() {
        let (control, registry, auth) = protocol();
        let reply = send(&control, "root.", ROOT_KEY, vec![command("USER.", &format!("ADD Alice {ALICE_KEY}"))]).await;
        assert_eq!(rcode(&reply), ResponseCode::NoError);
        assert_eq!(auth.capabilities(&name("alice.")), Capabilities::empty());

        let reply = send(&control, "alice.", ALICE_KEY, vec![command("ZONE.", "READ example. /z/example")]).await;
        assert_eq!(rcode(&reply), ResponseCode::NoError);
        assert!(registry.contains(&name("example.")));
    }

    #[tokio::test]
    async fn test_capabilities_enforced_when_enabled() {
        let (control, registry, auth) = protocol();
        let control = control.with_enforce_capabilities(true);
        auth.add_user(&name("alice."), ALICE_KEY).unwrap();

        let read = || vec![command("ZONE.", "READ example. /z/example")];
        let reply = send(&control, "alice.", ALICE_KEY, read()).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(registry.is_empty());

        let reply = send(&control, "root.", ROOT_KEY, vec![command("USER.", "ADDPOWER alice. write")]).await;
        assert_eq!(rcode(&reply), ResponseCode::NoError);

        let reply = send(&control, "alice.", ALICE_KEY, read()).await;
        assert_eq!(rcode(&reply), ResponseCode::NoError);
        assert!(registry.contains(&name("example.")));

        let reply = send(&control, "alice.", ALICE_KEY, vec![command("ZONE.", "DROP example.")]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(registry.contains(&name("example.")));
    }

    #[tokio::test]
    async fn test_power_commands_without_arguments_acknowledge() {
        let (control, _, auth) = protocol();
        let reply = send(
            &control,
            "root.",
            ROOT_KEY,
            vec![
                command("USER.", "ADDPOWER"),
                command("USER.", "DROPPOWER"),
                command("USER.", "LIST"),
            ],
        )
        .await;
        assert_eq!(rcode(&reply), ResponseCode::NoError);
        assert_eq!(auth.len(), 1);
    }

    #[tokio::test]
    async fn test_superuser_is_protected() {
        let (control, _, auth) = protocol();
        for text in ["DROP root.", "ADD root. bmV3", "DROPPOWER root. list"] {
            let reply = send(&control, "root.", ROOT_KEY, vec![command("USER.", text)]).await;
            assert_eq!(rcode(&reply), ResponseCode::FormErr, "{text}");
        }
        assert_eq!(auth.secret(&name("root.")).as_deref(), Some(ROOT_KEY));
        assert_eq!(auth.capabilities(&name("root.")), Capabilities::all());
    }

    #[tokio::test]
    async fn test_bad_signature_is_unsigned_format_error() {
        let (control, registry, _) = protocol();
        let reply = send(&control, "root.", "d3Jvbmc=", vec![command("ZONE.", "READ example. /z/example")]).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(matches!(reply, ControlReply::Unsigned(_)));
        assert!(registry.is_empty());

        let reply = send(&control, "nobody.", ROOT_KEY, vec![command("ZONE.", "READ example. /z/example")]).await;
        assert!(matches!(reply, ControlReply::Unsigned(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_signed_query_is_signed_format_error() {
        let (control, _, _) = protocol();
        let mut msg = update(vec![]);
        msg.set_op_code(OpCode::Query);
        let signed = sign(&msg, "root.", ROOT_KEY);
        let reply = control.handle(&msg, Some(&signed)).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(matches!(reply, ControlReply::Signed(..)));
    }

    #[tokio::test]
    async fn test_unsigned_update_is_format_error() {
        let (control, registry, _) = protocol();
        registry.insert(example_zone());

        let msg = update(vec![command("ZONE.", "DROP example.")]);
        let reply = control.handle(&msg, None).await;
        assert!(matches!(reply, ControlReply::Unsigned(_)));
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(reply.message().answers().is_empty());
        assert!(registry.contains(&name("example.")));

        // Commands smuggled into a plain query are refused the same way.
        let mut msg = update(vec![command("ZONE.", "DROP example.")]);
        msg.set_op_code(OpCode::Query);
        let reply = control.handle(&msg, None).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
        assert!(registry.contains(&name("example.")));
    }

    #[tokio::test]
    async fn test_directory_lists_origins() {
        let (control, registry, _) = protocol();
        registry.insert(example_zone());

        let mut msg = Message::new();
        let mut query = Query::query(name("zone."), RecordType::PTR);
        query.set_query_class(DNSClass::CH);
        msg.add_query(query);

        let reply = control.handle(&msg, None).await;
        let answers = reply.message().answers();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].record_type(), RecordType::PTR);
        assert_eq!(answers[0].dns_class(), DNSClass::CH);

        let mut msg = Message::new();
        let mut query = Query::query(name("user."), RecordType::PTR);
        query.set_query_class(DNSClass::CH);
        msg.add_query(query);
        let reply = control.handle(&msg, None).await;
        assert_eq!(rcode(&reply), ResponseCode::FormErr);
    }
}
