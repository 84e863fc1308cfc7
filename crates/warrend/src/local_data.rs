//! Local authoritative data, defined on the command line.
//!
//! Zones are in-memory only and built programmatically, so the
//! definition syntax is deliberately tiny: one `--zone` flag per
//! zone, one `--record` flag per record.
//!
//! ```text
//! --zone   'test.com. ns1.test.com. admin.test.com. 2023120101 3600 1800 604800 3600'
//! --record 'www.test.com. 300 A 192.168.1.2'
//! --record 'test.com. 300 MX 10 mail.test.com.'
//! --record 'test.com. 300 TXT v=spf1 ~all'
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};

use warren_types::protocol::types::*;
use warren_types::zones::types::{Zone, ZoneStore, SOA};

/// Parse a `--zone` flag: `ORIGIN MNAME RNAME SERIAL REFRESH RETRY
/// EXPIRE MINIMUM`.
pub fn parse_zone(input: &str) -> Result<Zone, LocalDataError> {
    let fields: Vec<&str> = input.split_whitespace().collect();
    let [origin, mname, rname, serial, refresh, retry, expire, minimum] = fields.as_slice()
    else {
        return Err(malformed(input, "expected 8 fields"));
    };

    let soa = SOA {
        mname: parse_name(input, mname)?,
        rname: parse_name(input, rname)?,
        serial: parse_u32(input, serial)?,
        refresh: parse_u32(input, refresh)?,
        retry: parse_u32(input, retry)?,
        expire: parse_u32(input, expire)?,
        minimum: parse_u32(input, minimum)?,
    };

    Ok(Zone::new(parse_name(input, origin)?, soa))
}

/// Parse a `--record` flag: `OWNER TTL TYPE RDATA...`.
pub fn parse_record(input: &str) -> Result<ResourceRecord, LocalDataError> {
    let fields: Vec<&str> = input.split_whitespace().collect();
    let [owner, ttl, rtype, rdata @ ..] = fields.as_slice() else {
        return Err(malformed(input, "expected at least 4 fields"));
    };

    let owner = parse_name(input, owner)?;
    let ttl = parse_u32(input, ttl)?;
    let rtype: RecordType = rtype
        .parse()
        .map_err(|_| malformed(input, "unknown record type"))?;

    let rtype_with_data = match (rtype, rdata) {
        (RecordType::A, [address]) => RecordTypeWithData::A {
            address: address
                .parse::<Ipv4Addr>()
                .map_err(|_| malformed(input, "bad IPv4 address"))?,
        },
        (RecordType::AAAA, [address]) => RecordTypeWithData::AAAA {
            address: address
                .parse::<Ipv6Addr>()
                .map_err(|_| malformed(input, "bad IPv6 address"))?,
        },
        (RecordType::CNAME, [cname]) => RecordTypeWithData::CNAME {
            cname: parse_name(input, cname)?,
        },
        (RecordType::NS, [nsdname]) => RecordTypeWithData::NS {
            nsdname: parse_name(input, nsdname)?,
        },
        (RecordType::PTR, [ptrdname]) => RecordTypeWithData::PTR {
            ptrdname: parse_name(input, ptrdname)?,
        },
        (RecordType::MX, [preference, exchange]) => RecordTypeWithData::MX {
            preference: preference
                .parse()
                .map_err(|_| malformed(input, "bad MX preference"))?,
            exchange: parse_name(input, exchange)?,
        },
        (RecordType::HINFO, [cpu, os]) => RecordTypeWithData::HINFO {
            cpu: cpu.as_bytes().to_vec(),
            os: os.as_bytes().to_vec(),
        },
        (RecordType::TXT, strings) if !strings.is_empty() => RecordTypeWithData::TXT {
            strings: strings.iter().map(|s| s.as_bytes().to_vec()).collect(),
        },
        _ => return Err(malformed(input, "record data does not fit the type")),
    };

    Ok(ResourceRecord {
        name: owner,
        rtype_with_data,
        rclass: RecordClass::IN,
        ttl,
    })
}

/// Assemble the zone store from the `--zone` and `--record` flags.
/// Every record must fall inside one of the defined zones.
pub fn build_zone_store(
    zone_inputs: &[String],
    record_inputs: &[String],
) -> Result<ZoneStore, LocalDataError> {
    let mut zones = Vec::with_capacity(zone_inputs.len());
    for input in zone_inputs {
        zones.push(parse_zone(input)?);
    }

    for input in record_inputs {
        let rr = parse_record(input)?;

        // the record belongs to the zone with the longest matching
        // origin
        let mut best: Option<usize> = None;
        for (i, zone) in zones.iter().enumerate() {
            if rr.name.is_subdomain_of(zone.origin())
                && best.map_or(true, |b| {
                    zone.origin().labels.len() > zones[b].origin().labels.len()
                })
            {
                best = Some(i);
            }
        }

        match best {
            Some(i) => {
                zones[i].insert(rr);
            }
            None => {
                return Err(LocalDataError::NoCoveringZone { owner: rr.name });
            }
        }
    }

    let mut store = ZoneStore::new();
    for zone in zones {
        store.add_zone(zone);
    }
    Ok(store)
}

fn parse_name(input: &str, field: &str) -> Result<DomainName, LocalDataError> {
    DomainName::from_dotted_string(field).ok_or_else(|| malformed(input, "bad domain name"))
}

fn parse_u32(input: &str, field: &str) -> Result<u32, LocalDataError> {
    field
        .parse()
        .map_err(|_| malformed(input, "bad numeric field"))
}

fn malformed(input: &str, reason: &'static str) -> LocalDataError {
    LocalDataError::Malformed {
        input: input.to_string(),
        reason,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDataError {
    Malformed { input: String, reason: &'static str },
    NoCoveringZone { owner: DomainName },
}

impl std::fmt::Display for LocalDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LocalDataError::Malformed { input, reason } => {
                write!(f, "could not parse '{input}': {reason}")
            }
            LocalDataError::NoCoveringZone { owner } => {
                write!(f, "record owner '{owner}' is not inside any defined zone")
            }
        }
    }
}

impl std::error::Error for LocalDataError {}
