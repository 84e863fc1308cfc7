use bytes::BytesMut;
use clap::Parser;
use std::collections::HashSet;
use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

use warren_resolver::authoritative;
use warren_resolver::cache::SharedCache;
use warren_resolver::config::{ResolverConfig, TransportConfig, ROOT_SERVERS};
use warren_resolver::recursive::Resolver;
use warren_resolver::errors::{ProtocolError, ResolverError};
use warren_resolver::transport::{read_tcp_message, send_tcp_message, NetTransport};
use warren_types::protocol::types::*;
use warren_types::zones::types::ZoneStore;

mod local_data;

/// Everything a request handler needs, cheap to clone into its task.
#[derive(Debug, Clone)]
struct ServerState {
    authoritative_only: bool,
    timeout: Duration,
    zones: Arc<RwLock<ZoneStore>>,
    resolver: Arc<Resolver<NetTransport>>,
}

/// Decode an inbound datagram and answer it.  Returns `None` when no
/// response should be sent at all: a message so broken its id is
/// unknown can only be dropped.
async fn handle_raw_message(state: &ServerState, buf: &[u8]) -> Option<Message> {
    let res = Message::from_octets(buf);
    tracing::trace!(message = ?res, "got message");

    match res {
        Ok(msg) => {
            if msg.header.is_response {
                Some(Message::make_format_error_response(msg.header.id))
            } else if msg.header.opcode == Opcode::Standard {
                Some(resolve_and_build_response(state, &msg).await)
            } else {
                let mut response = msg.make_response();
                response.header.rcode = Rcode::NotImplemented;
                Some(response)
            }
        }
        Err(err) => err.id().map(Message::make_format_error_response),
    }
}

/// Answer each question: local zones first, recursion (when allowed
/// and requested) for everything the zones do not cover.
async fn resolve_and_build_response(state: &ServerState, query: &Message) -> Message {
    let mut response = query.make_response();
    response.header.is_authoritative = true;
    response.header.recursion_available = !state.authoritative_only;

    let single_question = query.questions.len() == 1;
    for question in &query.questions {
        if question.is_unknown() {
            tracing::debug!(%question, "refused");
            response.header.rcode = Rcode::Refused;
            response.header.is_authoritative = false;
            continue;
        }

        let (fragment, covered) = {
            // hold the lock for the whole question so it sees one
            // consistent version of the zones
            let zones = state.zones.read().await;
            let covered = zones.find(&question.name).is_some();
            let request = Message::from_question(query.header.id, question.clone());
            (authoritative::respond(&request, &zones), covered)
        };

        if covered {
            response.header.is_authoritative &= fragment.header.is_authoritative;
            response.answers.extend(fragment.answers);
            response.authority.extend(fragment.authority);
            if single_question && fragment.header.rcode != Rcode::NoError {
                response.header.rcode = fragment.header.rcode;
            }
            continue;
        }

        if response.header.recursion_available && query.header.recursion_desired {
            response.header.is_authoritative = false;
            let lookup = state
                .resolver
                .query(question.name.clone(), question.qtype, question.qclass);
            match timeout(state.timeout, lookup).await {
                Ok(Ok(answer)) => response.answers.extend(answer.answers),
                Ok(Err(ResolverError::Protocol(ProtocolError::NameError))) => {
                    tracing::debug!(%question, "recursive NXDOMAIN");
                    if single_question {
                        response.header.rcode = Rcode::NameError;
                    }
                }
                Ok(Err(error)) => {
                    tracing::debug!(%question, %error, "recursive resolution failed");
                    if single_question {
                        response.header.rcode = Rcode::ServerFailure;
                    }
                }
                Err(_) => {
                    tracing::debug!(%question, "recursive resolution timed out");
                    if single_question {
                        response.header.rcode = Rcode::ServerFailure;
                    }
                }
            }
        } else if single_question {
            // no authoritative data and no recursion on offer
            response.header.rcode = Rcode::NameError;
        }
    }

    response
}

async fn listen_udp_task(state: ServerState, socket: UdpSocket) {
    let (tx, mut rx) = mpsc::channel::<(Message, SocketAddr)>(32);
    let mut buf = vec![0u8; 512];

    loop {
        tokio::select! {
            Ok((size, peer)) = socket.recv_from(&mut buf) => {
                tracing::debug!(?peer, "UDP request");
                let bytes = BytesMut::from(&buf[..size]);
                let reply = tx.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    if let Some(response) = handle_raw_message(&state, bytes.as_ref()).await {
                        if let Err(error) = reply.send((response, peer)).await {
                            tracing::debug!(?peer, ?error, "UDP reply channel error");
                        }
                    }
                });
            }

            Some((message, peer)) = rx.recv() => {
                match message.to_octets() {
                    Ok(mut serialised) => {
                        if let Err(error) = send_udp_response_to(&socket, peer, &mut serialised).await {
                            tracing::debug!(?peer, ?error, "UDP send error");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(?peer, ?message, ?error, "could not serialise message");
                    }
                }
            }
        }
    }
}

/// Send a response datagram.  A response too big for the channel is
/// cut at the UDP limit with the TC flag set, so the client knows to
/// retry over TCP.
async fn send_udp_response_to(
    sock: &UdpSocket,
    target: SocketAddr,
    bytes: &mut [u8],
) -> Result<(), std::io::Error> {
    if bytes.len() > 512 {
        bytes[2] |= 0b0000_0010;
        sock.send_to(&bytes[..512], target).await?;
    } else {
        sock.send_to(bytes, target).await?;
    }

    Ok(())
}

async fn listen_tcp_task(state: ServerState, listener: TcpListener, max_connections: usize) {
    let semaphore = Arc::new(Semaphore::new(max_connections.max(1)));

    loop {
        match listener.accept().await {
            Ok((mut stream, peer)) => {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    // the semaphore is never closed
                    return;
                };
                tracing::debug!(?peer, "TCP request");
                let state = state.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let response = match read_tcp_message(&mut stream).await {
                        Ok(bytes) => handle_raw_message(&state, bytes.as_ref()).await,
                        Err(error) => {
                            tracing::debug!(?peer, %error, "TCP read error");
                            None
                        }
                    };
                    if let Some(message) = response {
                        match message.to_octets() {
                            Ok(serialised) => {
                                if let Err(error) =
                                    send_tcp_message(&mut stream, &serialised).await
                                {
                                    tracing::debug!(?peer, %error, "TCP send error");
                                }
                            }
                            Err(error) => {
                                tracing::warn!(
                                    ?peer,
                                    ?message,
                                    ?error,
                                    "could not serialise message"
                                );
                            }
                        }
                    }
                });
            }
            Err(error) => tracing::debug!(?error, "TCP accept error"),
        }
    }
}

/// Delete expired cache entries every 5 minutes, pruning down to size
/// if the cache has grown too big.
async fn prune_cache_task(cache: SharedCache) {
    loop {
        sleep(Duration::from_secs(60 * 5)).await;
        let (overflow, current_size, expired, pruned) = cache.prune();

        if overflow {
            tracing::info!(%current_size, "cache overflowed its desired size");
        }
        if expired > 0 || pruned > 0 {
            tracing::info!(%expired, %pruned, "pruned cache");
        }
    }
}

fn begin_logging() {
    let log_format = if let Ok(var) = env::var("RUST_LOG_FORMAT") {
        var.split(',').map(ToString::to_string).collect()
    } else {
        HashSet::new()
    };

    let logger = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(!log_format.contains("no-ansi"));

    if log_format.contains("json") {
        if log_format.contains("no-time") {
            logger.json().without_time().init();
        } else {
            logger.json().init();
        }
    } else if log_format.contains("pretty") {
        if log_format.contains("no-time") {
            logger.pretty().without_time().init();
        } else {
            logger.pretty().init();
        }
    } else if log_format.contains("no-time") {
        logger.without_time().init();
    } else {
        logger.init();
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Clone, Parser)]
/// An authoritative and recursive DNS server.
///
/// warrend answers from its in-memory zones first, defined entirely
/// on the command line, and recursively resolves everything else
/// starting from the root servers, caching what it learns.
///
/// It does not speak to upstream nameservers over IPv6.
struct Args {
    /// Interface to listen on
    #[clap(long, value_parser, default_value_t = Ipv4Addr::UNSPECIFIED, env = "WARREND_BIND_HOST")]
    bind_host: Ipv4Addr,

    /// Port to listen on
    #[clap(long, value_parser, default_value_t = 53, env = "WARREND_BIND_PORT")]
    bind_port: u16,

    /// How many TCP connections to serve at once
    #[clap(long, value_parser, default_value_t = 64)]
    max_connections: usize,

    /// How long to spend on a single question, in seconds
    #[clap(long, value_parser, default_value_t = 5)]
    timeout: u64,

    /// Only answer queries from the local zones: never recurse
    #[clap(long, action(clap::ArgAction::SetTrue))]
    authoritative_only: bool,

    /// How many responses to hold in the cache
    #[clap(short = 's', long, value_parser, default_value_t = 512)]
    cache_size: usize,

    /// Root nameserver to start recursion from, can be specified more
    /// than once; defaults to the IANA roots
    #[clap(long, value_parser)]
    root_server: Vec<Ipv4Addr>,

    /// Define a zone: 'ORIGIN MNAME RNAME SERIAL REFRESH RETRY EXPIRE
    /// MINIMUM', can be specified more than once
    #[clap(short = 'z', long, value_parser)]
    zone: Vec<String>,

    /// Add a record to a defined zone: 'OWNER TTL TYPE RDATA...', can
    /// be specified more than once
    #[clap(short = 'r', long, value_parser)]
    record: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging();

    let zones = match local_data::build_zone_store(&args.zone, &args.record) {
        Ok(zones) => zones,
        Err(error) => {
            tracing::error!(%error, "could not build local zones");
            process::exit(1);
        }
    };

    let cache = SharedCache::with_desired_size(args.cache_size.max(1));
    let resolver_config = ResolverConfig {
        use_cache: true,
        root_servers: if args.root_server.is_empty() {
            ROOT_SERVERS.to_vec()
        } else {
            args.root_server.clone()
        },
        transport: TransportConfig::default(),
    };
    let resolver = Resolver::new(resolver_config, cache.clone(), NetTransport::new());

    tracing::info!(interface = %args.bind_host, port = %args.bind_port, "binding DNS UDP socket");
    let udp = match UdpSocket::bind((args.bind_host, args.bind_port)).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    tracing::info!(interface = %args.bind_host, port = %args.bind_port, "binding DNS TCP socket");
    let tcp = match TcpListener::bind((args.bind_host, args.bind_port)).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not bind DNS TCP socket");
            process::exit(1);
        }
    };

    let state = ServerState {
        authoritative_only: args.authoritative_only,
        timeout: Duration::from_secs(args.timeout),
        zones: Arc::new(RwLock::new(zones)),
        resolver: Arc::new(resolver),
    };

    tokio::spawn(listen_udp_task(state.clone(), udp));
    tokio::spawn(listen_tcp_task(state, tcp, args.max_connections));
    tokio::spawn(prune_cache_task(cache));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutting down"),
        Err(error) => {
            tracing::error!(?error, "could not wait for shutdown signal");
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use warren_types::protocol::types::test_util::*;

    use super::*;

    fn test_state() -> ServerState {
        let zones = local_data::build_zone_store(
            &["test.com. ns1.test.com. admin.test.com. 1 3600 1800 604800 300".to_string()],
            &["www.test.com. 300 A 192.168.1.2".to_string()],
        )
        .unwrap();

        ServerState {
            authoritative_only: true,
            timeout: Duration::from_secs(1),
            zones: Arc::new(RwLock::new(zones)),
            resolver: Arc::new(Resolver::new(
                ResolverConfig::default(),
                SharedCache::new(),
                NetTransport::new(),
            )),
        }
    }

    #[tokio::test]
    async fn undecodable_message_with_id_gets_formerr() {
        let state = test_state();

        let response = handle_raw_message(&state, &[0x12, 0x34, 0x00]).await.unwrap();

        assert_eq!(0x1234, response.header.id);
        assert_eq!(Rcode::FormatError, response.header.rcode);
    }

    #[tokio::test]
    async fn undecodable_message_without_id_is_dropped() {
        let state = test_state();

        assert!(handle_raw_message(&state, &[0x12]).await.is_none());
    }

    #[tokio::test]
    async fn non_standard_opcode_gets_notimp() {
        let state = test_state();
        let mut query = Message::from_question(
            77,
            Question {
                name: domain("www.test.com."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        query.header.opcode = Opcode::Status;

        let response = handle_raw_message(&state, &query.to_octets().unwrap())
            .await
            .unwrap();

        assert_eq!(Rcode::NotImplemented, response.header.rcode);
    }

    #[tokio::test]
    async fn authoritative_answer_from_local_zone() {
        let state = test_state();
        let query = Message::from_question(
            77,
            Question {
                name: domain("www.test.com."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );

        let response = handle_raw_message(&state, &query.to_octets().unwrap())
            .await
            .unwrap();

        assert!(response.header.is_authoritative);
        assert!(!response.header.recursion_available);
        assert_eq!(
            vec![a_record("www.test.com.", Ipv4Addr::new(192, 168, 1, 2))],
            response.answers
        );
    }

    #[tokio::test]
    async fn uncovered_name_without_recursion_is_nxdomain() {
        let state = test_state();
        let mut query = Message::from_question(
            77,
            Question {
                name: domain("www.example.net."),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        query.header.recursion_desired = true;

        let response = handle_raw_message(&state, &query.to_octets().unwrap())
            .await
            .unwrap();

        assert_eq!(Rcode::NameError, response.header.rcode);
        assert!(!response.header.recursion_available);
    }
}
