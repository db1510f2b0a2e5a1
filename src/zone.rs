//! In-memory zone data: named nodes holding type-indexed record sets.
//!
//! A [`Zone`] is built once by a [`ZoneBuilder`] and never patched afterwards;
//! re-reading a zone produces a new `Zone` that replaces the old one in the
//! registry.

use hickory_proto::rr::rdata::{SOA, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use tracing::debug;

use crate::error::LoadError;

/// Records of one type under one owner, in load order.
pub type RecordSet = Vec<Record>;

/// The parts of a record the matching algorithm cares about.
#[derive(Debug, Clone, Copy)]
pub enum RecordKind<'a> {
    /// NS: the name of a server for a delegated (or the apex) name.
    Delegation(&'a Name),
    /// A record.
    AddressV4(Ipv4Addr),
    /// AAAA record.
    AddressV6(Ipv6Addr),
    /// CNAME target.
    Alias(&'a Name),
    /// Zone apex metadata.
    StartOfAuthority(&'a SOA),
    /// TXT strings, used by the control channel.
    Text(&'a TXT),
    /// Anything else; carried opaquely.
    Other,
}

impl<'a> RecordKind<'a> {
    /// Classify a record by its data.
    pub fn of(record: &'a Record) -> Self {
        match record.data() {
            RData::NS(ns) => RecordKind::Delegation(&ns.0),
            RData::A(a) => RecordKind::AddressV4(a.0),
            RData::AAAA(aaaa) => RecordKind::AddressV6(aaaa.0),
            RData::CNAME(cname) => RecordKind::Alias(&cname.0),
            RData::SOA(soa) => RecordKind::StartOfAuthority(soa),
            RData::TXT(txt) => RecordKind::Text(txt),
            _ => RecordKind::Other,
        }
    }
}

/// Where a zone was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneSource {
    /// Master file on the local filesystem.
    File(PathBuf),
    /// AXFR from a remote primary (`host:port`).
    Transfer(String),
    /// Assembled in memory (tests, embedding).
    Memory,
}

impl fmt::Display for ZoneSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneSource::File(path) => write!(f, "file:{}", path.display()),
            ZoneSource::Transfer(endpoint) => write!(f, "axfr:{endpoint}"),
            ZoneSource::Memory => f.write_str("memory"),
        }
    }
}

/// One owner name and its record sets.
#[derive(Debug, Clone)]
pub struct Node {
    name: Name,
    rrsets: HashMap<RecordType, RecordSet>,
    delegated: bool,
}

impl Node {
    fn new(name: Name) -> Self {
        Self {
            name,
            rrsets: HashMap::new(),
            delegated: false,
        }
    }

    /// Owner name (lowercase, fully qualified).
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Record set of the given type, if present.
    pub fn get(&self, rtype: RecordType) -> Option<&RecordSet> {
        self.rrsets.get(&rtype)
    }

    /// True when this name starts a sub-domain served elsewhere.
    pub fn is_delegated(&self) -> bool {
        self.delegated
    }

    /// Record types present at this node.
    pub fn record_types(&self) -> impl Iterator<Item = RecordType> + '_ {
        self.rrsets.keys().copied()
    }
}

/// An authoritative zone.
#[derive(Debug, Clone)]
pub struct Zone {
    origin: Name,
    nodes: HashMap<Name, Node>,
    wildcard_count: usize,
    source: ZoneSource,
}

impl Zone {
    /// Zone origin (lowercase, fully qualified).
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Where this zone was loaded from.
    pub fn source(&self) -> &ZoneSource {
        &self.source
    }

    /// Number of wildcard owners in the zone.
    pub fn wildcard_count(&self) -> usize {
        self.wildcard_count
    }

    /// Number of owner names.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Exact-name lookup.
    pub fn find(&self, name: &Name) -> Option<&Node> {
        self.nodes.get(&name.to_lowercase())
    }

    /// Closest delegation point strictly above `name`, walking toward the origin.
    ///
    /// The node for `name` itself is not considered here; the resolver handles
    /// an exact hit on a delegation point separately.
    pub fn find_delegation(&self, name: &Name) -> Option<&Node> {
        let name = name.to_lowercase();
        if name == self.origin || !self.origin.zone_of(&name) {
            return None;
        }

        let mut current = name.base_name();
        loop {
            if let Some(node) = self.nodes.get(&current) {
                if node.delegated {
                    return Some(node);
                }
            }
            if current == self.origin || current.is_root() {
                return None;
            }
            current = current.base_name();
        }
    }

    /// The origin node.
    pub fn apex(&self) -> &Node {
        // ZoneBuilder::build refuses to produce a zone without an apex node.
        &self.nodes[&self.origin]
    }

    /// SOA record set at the apex.
    pub fn soa(&self) -> Option<&RecordSet> {
        self.apex().get(RecordType::SOA)
    }

    /// SOA serial, for logging.
    pub fn serial(&self) -> Option<u32> {
        self.soa()?
            .iter()
            .find_map(|record| match RecordKind::of(record) {
                RecordKind::StartOfAuthority(soa) => Some(soa.serial()),
                _ => None,
            })
    }

    /// Address records for a delegation target: AAAA when present, else A.
    pub fn find_glue(&self, name: &Name) -> Option<&RecordSet> {
        let node = self.find(name)?;
        node.get(RecordType::AAAA)
            .or_else(|| node.get(RecordType::A))
    }
}

/// Accumulates records into a [`Zone`].
#[derive(Debug)]
pub struct ZoneBuilder {
    origin: Name,
    nodes: HashMap<Name, Node>,
}

impl ZoneBuilder {
    /// Start a zone for `origin`.
    pub fn new(origin: &Name) -> Self {
        let mut origin = origin.to_lowercase();
        origin.set_fqdn(true);
        Self {
            origin,
            nodes: HashMap::new(),
        }
    }

    /// Origin the builder was started with.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Add one record. Owners outside of the origin are rejected.
    pub fn add(&mut self, record: Record) -> Result<(), LoadError> {
        let owner = record.name().to_lowercase();
        if !self.origin.zone_of(&owner) {
            return Err(LoadError::OutOfZone {
                origin: self.origin.clone(),
                owner,
            });
        }

        self.nodes
            .entry(owner.clone())
            .or_insert_with(|| Node::new(owner))
            .rrsets
            .entry(record.record_type())
            .or_default()
            .push(record);
        Ok(())
    }

    /// Add many records.
    pub fn extend<I>(&mut self, records: I) -> Result<(), LoadError>
    where
        I: IntoIterator<Item = Record>,
    {
        for record in records {
            self.add(record)?;
        }
        Ok(())
    }

    /// Finish the zone: mark delegation points, count wildcards, check the apex.
    pub fn build(mut self, source: ZoneSource) -> Result<Zone, LoadError> {
        let has_soa = self
            .nodes
            .get(&self.origin)
            .is_some_and(|apex| apex.rrsets.contains_key(&RecordType::SOA));
        if !has_soa {
            return Err(LoadError::MissingSoa(self.origin));
        }

        let mut wildcard_count = 0;
        for (name, node) in self.nodes.iter_mut() {
            node.delegated = *name != self.origin && node.rrsets.contains_key(&RecordType::NS);
            if name.is_wildcard() {
                wildcard_count += 1;
            }
        }

        debug!(
            origin = %self.origin,
            nodes = self.nodes.len(),
            wildcards = wildcard_count,
            %source,
            "built zone"
        );

        Ok(Zone {
            origin: self.origin,
            nodes: self.nodes,
            wildcard_count,
            source,
        })
    }
}
