use std::collections::HashMap;

use crate::protocol::types::*;

/// A collection of zones, one per origin.
///
/// All state is in memory and built programmatically: there is no zone
/// file subsystem.  Concurrent use is the caller's concern (the server
/// keeps a store behind an `RwLock`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneStore {
    zones: HashMap<DomainName, Zone>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self {
            zones: HashMap::new(),
        }
    }

    /// Insert a zone, replacing any existing zone with the same
    /// origin.
    pub fn add_zone(&mut self, zone: Zone) {
        self.zones.insert(zone.origin().clone(), zone);
    }

    /// Remove the zone with this origin, returning it if it was
    /// there.
    pub fn remove_zone(&mut self, origin: &DomainName) -> Option<Zone> {
        self.zones.remove(origin)
    }

    /// Find the zone for a domain: the zone whose origin is the
    /// longest suffix of the name.
    pub fn find(&self, name: &DomainName) -> Option<&Zone> {
        for i in 0..name.labels.len() {
            let labels = &name.labels[i..];
            if let Some(origin) = DomainName::from_labels(labels.into()) {
                if let Some(zone) = self.zones.get(&origin) {
                    return Some(zone);
                }
            }
        }

        None
    }

    /// All records at `qname` whose type and class match the query
    /// literally.  `ANY` is not expanded here: a responder which
    /// supports it uses `lookup_all`.  An empty result is not an
    /// error, and also covers the case where no zone's origin is a
    /// suffix of `qname`.
    pub fn lookup(
        &self,
        qname: &DomainName,
        qtype: QueryType,
        qclass: QueryClass,
    ) -> Vec<ResourceRecord> {
        let (QueryType::Record(rtype), QueryClass::Record(rclass)) = (qtype, qclass) else {
            return Vec::new();
        };

        match self.find(qname) {
            Some(zone) => zone
                .records_at(qname)
                .iter()
                .filter(|rr| rr.rtype_with_data.rtype() == rtype && rr.rclass == rclass)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// All records at `qname` regardless of type, for `ANY` queries.
    pub fn lookup_all(&self, qname: &DomainName, qclass: QueryClass) -> Vec<ResourceRecord> {
        match self.find(qname) {
            Some(zone) => zone
                .records_at(qname)
                .iter()
                .filter(|rr| rr.rclass.matches(qclass))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// A zone: an origin, its SOA, and the records attached to owner names
/// at or below the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// The domain name all records in this zone fall under.
    origin: DomainName,

    /// The start of authority for the zone.
    soa: SOA,

    /// Records indexed by owner name.  Lookup is exact-match on the
    /// owner: there is no wildcard expansion.
    records: HashMap<DomainName, Vec<ResourceRecord>>,
}

impl Zone {
    /// Construct a zone.  The SOA is inserted as a record at the
    /// origin.
    pub fn new(origin: DomainName, soa: SOA) -> Self {
        let mut zone = Self {
            origin,
            soa,
            records: HashMap::new(),
        };
        let soa_rr = zone.soa_rr();
        zone.records.insert(zone.origin.clone(), vec![soa_rr]);
        zone
    }

    pub fn builder(origin: DomainName) -> ZoneBuilder {
        ZoneBuilder::new(origin)
    }

    pub fn origin(&self) -> &DomainName {
        &self.origin
    }

    pub fn soa(&self) -> &SOA {
        &self.soa
    }

    /// The SOA as a resource record owned by the origin.
    pub fn soa_rr(&self) -> ResourceRecord {
        self.soa.to_rr(&self.origin)
    }

    /// Insert a record.  Returns false, and stores nothing, if the
    /// owner is not at or below the origin.  Exact duplicates are
    /// kept once.
    pub fn insert(&mut self, rr: ResourceRecord) -> bool {
        if !rr.name.is_subdomain_of(&self.origin) {
            return false;
        }

        let entries = self.records.entry(rr.name.clone()).or_default();
        if !entries.contains(&rr) {
            entries.push(rr);
        }
        true
    }

    /// All records at exactly this owner name.
    pub fn records_at(&self, name: &DomainName) -> &[ResourceRecord] {
        self.records.get(name).map_or(&[], Vec::as_slice)
    }

    /// Whether any records exist at exactly this owner name.
    pub fn has_name(&self, name: &DomainName) -> bool {
        self.records.contains_key(name)
    }

    /// The NS records of the nearest proper ancestor of `name` within
    /// this zone, for referrals.  The origin itself is not considered:
    /// NS records at the origin describe this zone's own authority,
    /// not a delegation away from it.
    pub fn referral_for(&self, name: &DomainName) -> Option<Vec<ResourceRecord>> {
        for i in 1..name.labels.len() {
            let labels = &name.labels[i..];
            let Some(ancestor) = DomainName::from_labels(labels.into()) else {
                continue;
            };
            if ancestor == self.origin || !ancestor.is_subdomain_of(&self.origin) {
                break;
            }

            let ns_rrs: Vec<ResourceRecord> = self
                .records_at(&ancestor)
                .iter()
                .filter(|rr| rr.rtype_with_data.rtype() == RecordType::NS)
                .cloned()
                .collect();
            if !ns_rrs.is_empty() {
                return Some(ns_rrs);
            }
        }

        None
    }
}

/// A SOA.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct SOA {
    pub mname: DomainName,
    pub rname: DomainName,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl SOA {
    /// Convert it into a SOA RR.
    pub fn to_rr(&self, name: &DomainName) -> ResourceRecord {
        ResourceRecord {
            name: name.clone(),
            rtype_with_data: self.to_rdata(),
            rclass: RecordClass::IN,
            ttl: self.minimum,
        }
    }

    /// Convert it into a SOA RDATA.
    pub fn to_rdata(&self) -> RecordTypeWithData {
        RecordTypeWithData::SOA {
            mname: self.mname.clone(),
            rname: self.rname.clone(),
            serial: self.serial,
            refresh: self.refresh,
            retry: self.retry,
            expire: self.expire,
            minimum: self.minimum,
        }
    }
}

/// Fluent construction of a zone.
///
/// ```rust
/// use warren_types::protocol::types::DomainName;
/// use warren_types::zones::types::Zone;
///
/// let origin = DomainName::from_dotted_string("example.com.").unwrap();
/// let www = DomainName::from_dotted_string("www.example.com.").unwrap();
/// let zone = Zone::builder(origin)
///     .soa("ns1.example.com.", "admin.example.com.", 1, 3600, 1800, 604800, 300)
///     .a(www, "192.0.2.1".parse().unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(1, zone.soa().serial);
/// ```
#[derive(Debug, Clone)]
pub struct ZoneBuilder {
    origin: DomainName,
    soa: Option<SOA>,
    default_ttl: u32,
    records: Vec<ResourceRecord>,
}

impl ZoneBuilder {
    pub fn new(origin: DomainName) -> Self {
        Self {
            origin,
            soa: None,
            default_ttl: 300,
            records: Vec::new(),
        }
    }

    /// The TTL given to records added after this call.
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// The start of authority.  `mname` and `rname` are dotted names;
    /// invalid names surface as an error from `build`.
    #[allow(clippy::too_many_arguments)]
    pub fn soa(
        mut self,
        mname: &str,
        rname: &str,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    ) -> Self {
        let (Some(mname), Some(rname)) = (
            DomainName::from_dotted_string(mname),
            DomainName::from_dotted_string(rname),
        ) else {
            // leave soa unset; build reports the missing SOA
            return self;
        };

        self.soa = Some(SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        });
        self
    }

    pub fn record(mut self, owner: DomainName, rtype_with_data: RecordTypeWithData) -> Self {
        self.records.push(ResourceRecord {
            name: owner,
            rtype_with_data,
            rclass: RecordClass::IN,
            ttl: self.default_ttl,
        });
        self
    }

    pub fn a(self, owner: DomainName, address: std::net::Ipv4Addr) -> Self {
        self.record(owner, RecordTypeWithData::A { address })
    }

    pub fn aaaa(self, owner: DomainName, address: std::net::Ipv6Addr) -> Self {
        self.record(owner, RecordTypeWithData::AAAA { address })
    }

    pub fn cname(self, owner: DomainName, cname: DomainName) -> Self {
        self.record(owner, RecordTypeWithData::CNAME { cname })
    }

    pub fn ns(self, owner: DomainName, nsdname: DomainName) -> Self {
        self.record(owner, RecordTypeWithData::NS { nsdname })
    }

    pub fn mx(self, owner: DomainName, preference: u16, exchange: DomainName) -> Self {
        self.record(
            owner,
            RecordTypeWithData::MX {
                preference,
                exchange,
            },
        )
    }

    pub fn ptr(self, owner: DomainName, ptrdname: DomainName) -> Self {
        self.record(owner, RecordTypeWithData::PTR { ptrdname })
    }

    pub fn txt(self, owner: DomainName, strings: Vec<Vec<u8>>) -> Self {
        self.record(owner, RecordTypeWithData::TXT { strings })
    }

    /// # Errors
    ///
    /// If no valid SOA was given, or a record's owner is outside the
    /// origin.
    pub fn build(self) -> Result<Zone, ZoneBuildError> {
        let Some(soa) = self.soa else {
            return Err(ZoneBuildError::MissingSOA {
                origin: self.origin,
            });
        };

        let mut zone = Zone::new(self.origin, soa);
        for rr in self.records {
            let name = rr.name.clone();
            if !zone.insert(rr) {
                return Err(ZoneBuildError::OwnerOutsideZone {
                    origin: zone.origin,
                    owner: name,
                });
            }
        }

        Ok(zone)
    }
}

/// An error from `ZoneBuilder::build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneBuildError {
    MissingSOA { origin: DomainName },
    OwnerOutsideZone { origin: DomainName, owner: DomainName },
}

impl std::fmt::Display for ZoneBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ZoneBuildError::MissingSOA { origin } => {
                write!(f, "zone '{origin}' has no valid SOA")
            }
            ZoneBuildError::OwnerOutsideZone { origin, owner } => {
                write!(f, "owner '{owner}' is outside zone '{origin}'")
            }
        }
    }
}

impl std::error::Error for ZoneBuildError {}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::protocol::types::test_util::*;

    fn test_zone() -> Zone {
        Zone::builder(domain("test.com."))
            .soa(
                "ns1.test.com.",
                "admin.test.com.",
                2023120101,
                3600,
                1800,
                604800,
                3600,
            )
            .a(domain("www.test.com."), Ipv4Addr::new(192, 168, 1, 2))
            .mx(domain("test.com."), 10, domain("mail.test.com."))
            .build()
            .unwrap()
    }

    fn test_store() -> ZoneStore {
        let mut store = ZoneStore::new();
        store.add_zone(test_zone());
        store
    }

    const IN: QueryClass = QueryClass::Record(RecordClass::IN);
    const A: QueryType = QueryType::Record(RecordType::A);

    #[test]
    fn lookup_matching_record() {
        let rrs = test_store().lookup(&domain("www.test.com."), A, IN);

        assert_eq!(1, rrs.len());
        assert_eq!(
            vec![0xC0, 0xA8, 0x01, 0x02],
            rrs[0].rtype_with_data.to_rdata().unwrap()
        );
    }

    #[test]
    fn lookup_wrong_type_is_empty() {
        let rrs = test_store().lookup(
            &domain("www.test.com."),
            QueryType::Record(RecordType::PTR),
            IN,
        );
        assert!(rrs.is_empty());
    }

    #[test]
    fn lookup_missing_name_is_empty() {
        let rrs = test_store().lookup(&domain("nope.test.com."), A, IN);
        assert!(rrs.is_empty());
    }

    #[test]
    fn lookup_filters_type_and_class() {
        let store = test_store();
        for qtype in [A, QueryType::Record(RecordType::MX)] {
            for rr in store.lookup(&domain("test.com."), qtype, IN) {
                assert_eq!(QueryType::Record(rr.rtype_with_data.rtype()), qtype);
                assert_eq!(QueryClass::Record(rr.rclass), IN);
            }
        }
    }

    #[test]
    fn lookup_multiple_records_of_same_type() {
        let mut zone = test_zone();
        zone.insert(a_record("test.com.", Ipv4Addr::new(192, 168, 1, 1)));
        zone.insert(a_record("test.com.", Ipv4Addr::new(192, 168, 1, 3)));

        let mut store = ZoneStore::new();
        store.add_zone(zone);

        let rrs = store.lookup(&domain("test.com."), A, IN);
        assert_eq!(2, rrs.len());

        let mut rdatas: Vec<Vec<u8>> = rrs
            .iter()
            .map(|rr| {
                assert_eq!(RecordType::A, rr.rtype_with_data.rtype());
                rr.rtype_with_data.to_rdata().unwrap()
            })
            .collect();
        rdatas.sort();
        assert_eq!(
            vec![vec![0xC0, 0xA8, 0x01, 0x01], vec![0xC0, 0xA8, 0x01, 0x03]],
            rdatas
        );
    }

    #[test]
    fn lookup_any_is_not_expanded_by_the_store() {
        assert!(test_store()
            .lookup(&domain("test.com."), QueryType::ANY, IN)
            .is_empty());

        let rrs = test_store().lookup_all(&domain("test.com."), IN);
        assert_eq!(2, rrs.len()); // the SOA and the MX
    }

    #[test]
    fn find_selects_longest_suffix() {
        let mut store = test_store();
        let subzone = Zone::builder(domain("sub.test.com."))
            .soa("ns1.sub.test.com.", "admin.test.com.", 1, 2, 3, 4, 5)
            .build()
            .unwrap();
        store.add_zone(subzone);

        assert_eq!(
            domain("test.com."),
            *store.find(&domain("www.test.com.")).unwrap().origin()
        );
        assert_eq!(
            domain("sub.test.com."),
            *store.find(&domain("www.sub.test.com.")).unwrap().origin()
        );
        assert!(store.find(&domain("example.net.")).is_none());
        assert!(store.find(&domain("com.")).is_none());
    }

    #[test]
    fn add_zone_replaces_same_origin() {
        let mut store = test_store();
        let replacement = Zone::builder(domain("test.com."))
            .soa("ns2.test.com.", "admin.test.com.", 99, 2, 3, 4, 5)
            .build()
            .unwrap();
        store.add_zone(replacement);

        assert_eq!(99, store.find(&domain("test.com.")).unwrap().soa().serial);
        assert!(store.lookup(&domain("www.test.com."), A, IN).is_empty());
    }

    #[test]
    fn remove_zone() {
        let mut store = test_store();
        assert!(store.remove_zone(&domain("test.com.")).is_some());
        assert!(store.remove_zone(&domain("test.com.")).is_none());
        assert!(store.find(&domain("www.test.com.")).is_none());
    }

    #[test]
    fn insert_rejects_owner_outside_zone() {
        let mut zone = test_zone();
        assert!(!zone.insert(a_record("example.net.", Ipv4Addr::new(1, 1, 1, 1))));
        assert!(zone.records_at(&domain("example.net.")).is_empty());
    }

    #[test]
    fn insert_deduplicates() {
        let mut zone = test_zone();
        let rr = a_record("www.test.com.", Ipv4Addr::new(192, 168, 1, 2));
        zone.insert(rr.clone());
        zone.insert(rr);

        assert_eq!(1, zone.records_at(&domain("www.test.com.")).len());
    }

    #[test]
    fn soa_is_queryable_at_origin() {
        let rrs = test_store().lookup(
            &domain("test.com."),
            QueryType::Record(RecordType::SOA),
            IN,
        );
        assert_eq!(1, rrs.len());
        assert_eq!(3600, rrs[0].ttl);
    }

    #[test]
    fn referral_from_delegation_point() {
        let mut zone = test_zone();
        zone.insert(ns_record("delegated.test.com.", "ns.delegated.test.com."));

        assert_eq!(
            Some(vec![ns_record(
                "delegated.test.com.",
                "ns.delegated.test.com."
            )]),
            zone.referral_for(&domain("www.delegated.test.com."))
        );

        // NS records at the origin are not a delegation
        assert_eq!(None, zone.referral_for(&domain("www.test.com.")));

        // a name at the delegation point itself has no proper ancestor
        // with NS records
        assert_eq!(None, zone.referral_for(&domain("delegated.test.com.")));
    }

    #[test]
    fn builder_requires_soa() {
        assert_eq!(
            Err(ZoneBuildError::MissingSOA {
                origin: domain("test.com.")
            }),
            Zone::builder(domain("test.com.")).build()
        );
    }

    #[test]
    fn builder_rejects_out_of_zone_owner() {
        let result = Zone::builder(domain("test.com."))
            .soa("ns1.test.com.", "admin.test.com.", 1, 2, 3, 4, 5)
            .a(domain("www.example.net."), Ipv4Addr::new(1, 1, 1, 1))
            .build();

        assert_eq!(
            Err(ZoneBuildError::OwnerOutsideZone {
                origin: domain("test.com."),
                owner: domain("www.example.net.")
            }),
            result
        );
    }
}
