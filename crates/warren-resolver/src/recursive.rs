//! Recursive DNS resolution: walk the hierarchy downwards from the
//! root servers, following referrals until one of the contacted
//! nameservers produces an answer.
//!
//! A resolution is a loop over a small amount of state (the current
//! name being resolved, the candidate nameserver addresses, and how
//! deep into a CNAME chain we are).  Each pass selects a nameserver,
//! awaits its response, and either finishes, redirects to a CNAME
//! target, descends through a referral (resolving the delegated
//! nameserver's own address first when no glue was supplied), or
//! gives up.  All the work is bounded: the loop runs at most
//! `MAX_ITERATIONS` passes and follows at most `MAX_CNAME_REDIRECTS`
//! redirections, whatever a hostile nameserver sends back.
//!
//! See section 5.3.3 of RFC 1034.

use async_recursion::async_recursion;
use rand::Rng;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::time::timeout;
use tracing::Instrument;

use warren_types::protocol::types::*;

use crate::cache::SharedCache;
use crate::config::ResolverConfig;
use crate::errors::{ProtocolError, ResolverError};
use crate::transport::{Endpoint, Transport, DNS_PORT, UDP_MAX_MESSAGE_SIZE};

/// How many passes of the resolution loop a single query may take.
pub const MAX_ITERATIONS: usize = 32;

/// How many CNAME redirections to follow before concluding that the
/// chain does not terminate.
pub const MAX_CNAME_REDIRECTS: usize = 16;

/// How deep nameserver-address side-resolutions (for glueless
/// referrals) may nest.
const GLUE_RECURSION_LIMIT: usize = 8;

/// A recursive resolver: a cache, a transport, and the configuration
/// saying where the roots are.  Both collaborators are injected at
/// construction, so tests can run the whole state machine against a
/// scripted transport.
#[derive(Debug, Clone)]
pub struct Resolver<T> {
    config: ResolverConfig,
    cache: SharedCache,
    transport: T,
}

impl<T: Transport> Resolver<T> {
    pub fn new(config: ResolverConfig, cache: SharedCache, transport: T) -> Self {
        Self {
            config,
            cache,
            transport,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a question, returning the final response message.
    ///
    /// On success the answer section holds at least one record of the
    /// requested type owned by the final name of the query: the
    /// queried name itself, or the end of the CNAME chain leading
    /// away from it.
    ///
    /// # Errors
    ///
    /// See `ResolverError`.
    pub async fn query(
        &self,
        name: DomainName,
        qtype: QueryType,
        qclass: QueryClass,
    ) -> Result<Message, ResolverError> {
        let question = Question {
            name,
            qtype,
            qclass,
        };
        let span = tracing::info_span!("query", %question);
        self.resolve(question, GLUE_RECURSION_LIMIT)
            .instrument(span)
            .await
    }

    #[async_recursion]
    async fn resolve(
        &self,
        question: Question,
        glue_limit: usize,
    ) -> Result<Message, ResolverError> {
        let mut qname = question.name.clone();
        let mut nameservers = self.config.root_servers.clone();
        // how many labels of the current name the delegation we're
        // sitting at already matches; referrals must do better
        let mut match_count = 0;
        let mut cname_redirects = 0;

        for _ in 0..MAX_ITERATIONS {
            let current = Question {
                name: qname.clone(),
                qtype: question.qtype,
                qclass: question.qclass,
            };

            if self.config.use_cache {
                if let Some(cached) = self.cache.get(&current) {
                    tracing::trace!(question = %current, "cache hit");
                    return Ok(cached);
                }
            }

            let response = self.query_nameservers(&nameservers, &current).await?;

            match classify_response(&current, &response, match_count) {
                ResponseOutcome::Answer => {
                    tracing::trace!(question = %current, "got answer");
                    if self.config.use_cache {
                        self.cache.insert(&current, &response);
                    }
                    return Ok(response);
                }
                ResponseOutcome::FollowCname { target } => {
                    tracing::trace!(question = %current, %target, "following cname");
                    cname_redirects += 1;
                    if cname_redirects > MAX_CNAME_REDIRECTS {
                        return Err(ResolverError::CnameLoop);
                    }
                    qname = target;
                    // conservative: start over from the roots for the
                    // new name
                    nameservers = self.config.root_servers.clone();
                    match_count = 0;
                }
                ResponseOutcome::Referral {
                    zone,
                    ns_names,
                    glue,
                } => {
                    tracing::trace!(question = %current, %zone, "got referral");
                    let mut addresses = glue;
                    if addresses.is_empty() {
                        addresses = self
                            .resolve_nameserver_addresses(&ns_names, glue_limit)
                            .await;
                    }
                    if addresses.is_empty() {
                        return Err(ResolverError::NoReachableNameserver);
                    }
                    match_count = zone.labels.len();
                    nameservers = addresses;
                }
                ResponseOutcome::NoData => {
                    tracing::trace!(question = %current, "no data");
                    return Err(ProtocolError::NameError.into());
                }
            }
        }

        Err(ResolverError::IterationLimit)
    }

    /// Resolve a referral's nameserver names into addresses, for
    /// referrals which carried no glue.  The first name that resolves
    /// wins; names that fail are skipped.
    async fn resolve_nameserver_addresses(
        &self,
        ns_names: &[DomainName],
        glue_limit: usize,
    ) -> Vec<Ipv4Addr> {
        if glue_limit == 0 {
            tracing::debug!("hit glue recursion limit");
            return Vec::new();
        }

        for ns_name in ns_names {
            let question = Question {
                name: ns_name.clone(),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            };
            match self.resolve(question, glue_limit - 1).await {
                Ok(response) => {
                    // a successful resolution leaves the address
                    // records in the answer section, whatever aliases
                    // the nameserver's own name went through
                    let addresses = filter_answers(response, |rtype_with_data| {
                        match rtype_with_data {
                            RecordTypeWithData::A { address } => Some(address),
                            _ => None,
                        }
                    });
                    if !addresses.is_empty() {
                        return addresses;
                    }
                }
                Err(error) => {
                    tracing::debug!(nameserver = %ns_name, %error, "could not resolve nameserver address");
                }
            }
        }

        Vec::new()
    }

    /// Try each candidate nameserver in turn.  Transport-level
    /// failures move on to the next candidate; errors signalled by a
    /// nameserver which did respond are returned to the caller.
    async fn query_nameservers(
        &self,
        addresses: &[Ipv4Addr],
        question: &Question,
    ) -> Result<Message, ResolverError> {
        for address in addresses {
            match self.query_nameserver(*address, question).await? {
                Some(response) => return Ok(response),
                None => {
                    tracing::debug!(%address, "nameserver unusable, trying the next candidate");
                }
            }
        }

        Err(ResolverError::NoReachableNameserver)
    }

    /// Send a question to one nameserver, with retries.  UDP is
    /// preferred when enabled; a truncated UDP response (or a UDP
    /// failure) falls back to TCP.
    ///
    /// Every attempt uses a fresh random transaction id, and any
    /// response which does not match the outstanding request - wrong
    /// id, wrong question, not a response at all - is discarded, as
    /// it may be an off-path forgery.
    ///
    /// `Ok(None)` means this nameserver is unusable.  Decode errors
    /// and nameserver-signalled failures are returned.
    async fn query_nameserver(
        &self,
        address: Ipv4Addr,
        question: &Question,
    ) -> Result<Option<Message>, ResolverError> {
        let transport_config = &self.config.transport;
        let endpoint_addr = SocketAddr::from((address, DNS_PORT));

        for _ in 0..transport_config.retry_count.max(1) {
            let mut request = Message::from_question(rand::thread_rng().gen(), question.clone());
            request.header.recursion_desired = true;

            let Ok(serialised) = request.to_octets() else {
                tracing::warn!(message = ?request, "could not serialise message");
                return Ok(None);
            };

            let mut response = None;
            if transport_config.use_udp && serialised.len() <= UDP_MAX_MESSAGE_SIZE {
                response = self
                    .exchange(&serialised, Endpoint::udp(endpoint_addr))
                    .await?;
            }

            let udp_truncated = matches!(&response, Some(r) if r.header.is_truncated);
            if transport_config.use_tcp && (response.is_none() || udp_truncated) {
                response = self
                    .exchange(&serialised, Endpoint::tcp(endpoint_addr))
                    .await?;
            }

            let Some(response) = response else {
                continue;
            };

            if response.header.is_truncated {
                // truncated and no way to retry over TCP: this
                // nameserver's answer cannot be used
                tracing::debug!(%address, "truncated response");
                continue;
            }

            if !response_matches_request(&request, &response) {
                tracing::debug!(%address, "discarding mismatched response");
                continue;
            }

            if let Some(error) = ProtocolError::from_rcode(response.header.rcode) {
                if error != ProtocolError::NameError {
                    return Err(error.into());
                }
            }

            return Ok(Some(response));
        }

        Ok(None)
    }

    /// One timed exchange of octets.  `Ok(None)` is a transport
    /// failure or timeout, recovered from by the caller; a response
    /// that arrives but cannot be decoded is an error.
    async fn exchange(
        &self,
        serialised: &[u8],
        endpoint: Endpoint,
    ) -> Result<Option<Message>, ResolverError> {
        match timeout(
            self.config.transport.timeout,
            self.transport.send(serialised, endpoint),
        )
        .await
        {
            Ok(Ok(octets)) => Ok(Some(Message::from_octets(&octets)?)),
            Ok(Err(error)) => {
                tracing::debug!(address = %endpoint.addr, proto = %endpoint.proto, %error, "transport error");
                Ok(None)
            }
            Err(_) => {
                tracing::debug!(address = %endpoint.addr, proto = %endpoint.proto, "timed out");
                Ok(None)
            }
        }
    }
}

/// Typed conveniences: run a query and pull the payloads of the
/// requested type out of the answer section.  An answer section with
/// no records of the requested type is an empty result, not an error.
impl<T: Transport> Resolver<T> {
    pub async fn resolve_a(&self, name: &DomainName) -> Result<Vec<Ipv4Addr>, ResolverError> {
        let response = self.query_in(name, RecordType::A).await?;
        Ok(filter_answers(response, |rd| match rd {
            RecordTypeWithData::A { address } => Some(address),
            _ => None,
        }))
    }

    pub async fn resolve_aaaa(
        &self,
        name: &DomainName,
    ) -> Result<Vec<std::net::Ipv6Addr>, ResolverError> {
        let response = self.query_in(name, RecordType::AAAA).await?;
        Ok(filter_answers(response, |rd| match rd {
            RecordTypeWithData::AAAA { address } => Some(address),
            _ => None,
        }))
    }

    pub async fn resolve_cname(&self, name: &DomainName) -> Result<Vec<DomainName>, ResolverError> {
        let response = self.query_in(name, RecordType::CNAME).await?;
        Ok(filter_answers(response, |rd| match rd {
            RecordTypeWithData::CNAME { cname } => Some(cname),
            _ => None,
        }))
    }

    pub async fn resolve_ns(&self, name: &DomainName) -> Result<Vec<DomainName>, ResolverError> {
        let response = self.query_in(name, RecordType::NS).await?;
        Ok(filter_answers(response, |rd| match rd {
            RecordTypeWithData::NS { nsdname } => Some(nsdname),
            _ => None,
        }))
    }

    /// Mail exchanges as `(preference, exchange)` pairs, lowest
    /// preference value (most preferred) first.
    pub async fn resolve_mx(
        &self,
        name: &DomainName,
    ) -> Result<Vec<(u16, DomainName)>, ResolverError> {
        let response = self.query_in(name, RecordType::MX).await?;
        let mut exchanges = filter_answers(response, |rd| match rd {
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => Some((preference, exchange)),
            _ => None,
        });
        exchanges.sort_by_key(|(preference, _)| *preference);
        Ok(exchanges)
    }

    pub async fn resolve_ptr(&self, name: &DomainName) -> Result<Vec<DomainName>, ResolverError> {
        let response = self.query_in(name, RecordType::PTR).await?;
        Ok(filter_answers(response, |rd| match rd {
            RecordTypeWithData::PTR { ptrdname } => Some(ptrdname),
            _ => None,
        }))
    }

    /// TXT data, one `Vec` of character-strings per record.
    pub async fn resolve_txt(
        &self,
        name: &DomainName,
    ) -> Result<Vec<Vec<Vec<u8>>>, ResolverError> {
        let response = self.query_in(name, RecordType::TXT).await?;
        Ok(filter_answers(response, |rd| match rd {
            RecordTypeWithData::TXT { strings } => Some(strings),
            _ => None,
        }))
    }

    async fn query_in(
        &self,
        name: &DomainName,
        rtype: RecordType,
    ) -> Result<Message, ResolverError> {
        self.query(
            name.clone(),
            QueryType::Record(rtype),
            QueryClass::Record(RecordClass::IN),
        )
        .await
    }
}

fn filter_answers<A>(
    response: Message,
    f: impl Fn(RecordTypeWithData) -> Option<A>,
) -> Vec<A> {
    response
        .answers
        .into_iter()
        .filter_map(|rr| f(rr.rtype_with_data))
        .collect()
}

/// What a nameserver's response means for the resolution loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResponseOutcome {
    /// The answer section answers the question.
    Answer,

    /// The answer section redirects the question to another name.
    FollowCname { target: DomainName },

    /// The authority section delegates a closer zone to other
    /// nameservers.  `glue` holds the addresses the additional
    /// section supplied for them, possibly none.
    Referral {
        zone: DomainName,
        ns_names: Vec<DomainName>,
        glue: Vec<Ipv4Addr>,
    },

    /// The nameserver had nothing: a name error or an empty answer
    /// with no delegation.
    NoData,
}

/// Decide what a validated response means.
///
/// `current_match_count` is how many labels of the question the
/// current delegation already matches: a referral which is no more
/// specific than that is not progress, and is ignored rather than
/// followed into a loop.
fn classify_response(
    question: &Question,
    response: &Message,
    current_match_count: usize,
) -> ResponseOutcome {
    // walk the answer section from the queried name, hopping through
    // aliases.  each step either finds a record of the requested type
    // at the current name (an answer, possibly at the end of a CNAME
    // chain carried in the same response) or a CNAME to hop through.
    // one hop per answer record is enough to traverse any chain the
    // response can hold, so a looping chain cannot wedge the walk.
    let mut name = question.name.clone();
    for _ in 0..=response.answers.len() {
        if response
            .answers
            .iter()
            .any(|rr| rr.name == name && rr.matches(question))
        {
            return ResponseOutcome::Answer;
        }

        let alias = response
            .answers
            .iter()
            .find_map(|rr| match &rr.rtype_with_data {
                RecordTypeWithData::CNAME { cname } if rr.name == name => Some(cname.clone()),
                _ => None,
            });
        match alias {
            Some(target) => name = target,
            None => break,
        }
    }

    // the chain moved us to a new name without answering; the outer
    // loop re-queries for it (and gives up if this happens too often)
    if name != question.name {
        return ResponseOutcome::FollowCname { target: name };
    }

    // NS records in the answer or authority sections are a referral
    // if they delegate a zone which covers the question more
    // specifically than the nameserver we just asked
    let mut zone: Option<DomainName> = None;
    let mut ns_names = Vec::new();
    for rr in response.answers.iter().chain(&response.authority) {
        if let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data {
            if !question.name.is_subdomain_of(&rr.name)
                || rr.name.labels.len() <= current_match_count
            {
                continue;
            }

            let more_specific = zone
                .as_ref()
                .map_or(true, |best| rr.name.labels.len() > best.labels.len());
            if more_specific {
                zone = Some(rr.name.clone());
                ns_names = vec![nsdname.clone()];
            } else if zone.as_ref() == Some(&rr.name) {
                ns_names.push(nsdname.clone());
            }
        }
    }

    if let Some(zone) = zone {
        let glue = response
            .additional
            .iter()
            .filter_map(|rr| match &rr.rtype_with_data {
                RecordTypeWithData::A { address } if ns_names.contains(&rr.name) => Some(*address),
                _ => None,
            })
            .collect();

        return ResponseOutcome::Referral {
            zone,
            ns_names,
            glue,
        };
    }

    ResponseOutcome::NoData
}

/// Check that a response corresponds to the outstanding request: the
/// transaction id must match, it must actually be a response, and the
/// opcode and question must be the ones sent.
pub fn response_matches_request(request: &Message, response: &Message) -> bool {
    request.header.id == response.header.id
        && response.header.is_response
        && request.header.opcode == response.header.opcode
        && request.questions == response.questions
}
