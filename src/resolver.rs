//! Query matching against a single zone.
//!
//! Order of precedence:
//!
//! ```text
//! ANY                          -> SERVFAIL
//! ancestor is a delegation     -> referral (NS in authority, glue in additional)
//! exact node, delegated        -> referral
//! exact node, has qtype        -> answer + apex SOA
//! exact node, has CNAME        -> the CNAME + apex SOA (not chased)
//! exact node                   -> NODATA + apex SOA
//! *.<parent> exists            -> as exact node, owner rewritten to qname
//! otherwise                    -> NXDOMAIN
//! ```

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use tracing::{debug, info};

use crate::metrics::{self, QueryResult, Timer};
use crate::reply;
use crate::zone::{Node, RecordKind, Zone};

/// Answers ordinary queries from zone data.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    log_queries: bool,
}

/// A response and how it was produced.
#[derive(Debug)]
pub struct Resolution {
    /// The response message.
    pub message: Message,
    /// Which branch of the matching algorithm answered.
    pub result: QueryResult,
}

impl Resolver {
    /// Create a resolver; `log_queries` logs every incoming query at info.
    pub fn new(log_queries: bool) -> Self {
        Self { log_queries }
    }

    /// Answer the first question of `request` from `zone`.
    pub fn resolve(&self, request: &Message, zone: &Zone) -> Resolution {
        let timer = Timer::start();
        let mut response = reply::reply_to(request);

        let result = match request.queries().first() {
            Some(query) => {
                let qname = query.name();
                let qtype = query.query_type();
                if self.log_queries {
                    info!(
                        zone = %zone.origin(),
                        name = %qname,
                        rtype = ?qtype,
                        id = request.id(),
                        "incoming query"
                    );
                }
                let result = self.matching(&mut response, zone, qname, qtype);
                metrics::record_query(&format!("{:?}", qtype), result, timer.elapsed());
                result
            }
            None => {
                response.set_response_code(ResponseCode::FormErr);
                QueryResult::FormErr
            }
        };

        reply::echo_edns(request, &mut response);
        Resolution {
            message: response,
            result,
        }
    }

    /// Name error for a question no loaded zone encloses.
    pub fn unbound(&self, request: &Message) -> Resolution {
        let timer = Timer::start();
        let mut response = reply::reply_to(request);
        response.set_response_code(ResponseCode::NXDomain);

        if let Some(query) = request.queries().first() {
            if self.log_queries {
                info!(
                    name = %query.name(),
                    rtype = ?query.query_type(),
                    id = request.id(),
                    "incoming query"
                );
            }
            debug!(name = %query.name(), "no zone encloses query");
            metrics::record_query(
                &format!("{:?}", query.query_type()),
                QueryResult::NxDomain,
                timer.elapsed(),
            );
        }

        reply::echo_edns(request, &mut response);
        Resolution {
            message: response,
            result: QueryResult::NxDomain,
        }
    }

    fn matching(
        &self,
        response: &mut Message,
        zone: &Zone,
        qname: &Name,
        qtype: RecordType,
    ) -> QueryResult {
        if qtype == RecordType::ANY {
            debug!(zone = %zone.origin(), name = %qname, "refusing ANY query");
            response.set_response_code(ResponseCode::ServFail);
            return QueryResult::ServFail;
        }

        if let Some(cut) = zone.find_delegation(qname) {
            debug!(zone = %zone.origin(), name = %qname, cut = %cut.name(), "referral");
            return referral(response, zone, cut);
        }

        if let Some(node) = zone.find(qname) {
            if node.is_delegated() {
                debug!(zone = %zone.origin(), name = %qname, "referral at delegation point");
                return referral(response, zone, node);
            }
            return answer_from_node(response, zone, node, qname, qtype, false);
        }

        if zone.wildcard_count() > 0 {
            if let Some(node) = wildcard_of(qname).and_then(|w| zone.find(&w)) {
                debug!(zone = %zone.origin(), name = %qname, wildcard = %node.name(), "wildcard match");
                return answer_from_node(response, zone, node, qname, qtype, true);
            }
        }

        debug!(zone = %zone.origin(), name = %qname, "name error");
        response.set_response_code(ResponseCode::NXDomain);
        QueryResult::NxDomain
    }
}

/// `*.` followed by everything but the leftmost label.
fn wildcard_of(name: &Name) -> Option<Name> {
    if name.is_root() {
        return None;
    }
    name.base_name().prepend_label("*").ok()
}

/// Point the querier at the servers for `cut`.
fn referral(response: &mut Message, zone: &Zone, cut: &Node) -> QueryResult {
    response.set_authoritative(false);
    let Some(servers) = cut.get(RecordType::NS) else {
        return QueryResult::Referral;
    };
    response.add_name_servers(servers.iter().cloned());

    for record in servers {
        match RecordKind::of(record) {
            RecordKind::Delegation(target) => {
                // Only targets inside the delegated name need glue.
                if !cut.name().zone_of(target) {
                    continue;
                }
                if let Some(glue) = zone.find_glue(target) {
                    response.add_additionals(glue.iter().cloned());
                }
            }
            RecordKind::AddressV4(_)
            | RecordKind::AddressV6(_)
            | RecordKind::Alias(_)
            | RecordKind::StartOfAuthority(_)
            | RecordKind::Text(_)
            | RecordKind::Other => {}
        }
    }
    QueryResult::Referral
}

/// Positive, alias or no-data answer from one node.
fn answer_from_node(
    response: &mut Message,
    zone: &Zone,
    node: &Node,
    qname: &Name,
    qtype: RecordType,
    wildcard: bool,
) -> QueryResult {
    response.set_authoritative(true);
    let owned = |records: &[Record]| -> Vec<Record> {
        records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                if wildcard {
                    record.set_name(qname.clone());
                }
                record
            })
            .collect()
    };

    let result = if let Some(rrset) = node.get(qtype) {
        response.add_answers(owned(rrset));
        if wildcard {
            QueryResult::Wildcard
        } else {
            QueryResult::Answer
        }
    } else if let Some(alias) = node.get(RecordType::CNAME) {
        // TODO: chase the alias inside the zone once a loop limit is decided.
        response.add_answers(owned(alias));
        QueryResult::Alias
    } else {
        QueryResult::NoData
    };

    if let Some(soa) = zone.soa() {
        response.add_name_servers(soa.iter().cloned());
    }
    result
}
