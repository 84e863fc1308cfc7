use clap::Parser;
use std::net::Ipv4Addr;
use std::process;
use std::time::Duration;

use warren_resolver::cache::SharedCache;
use warren_resolver::config::{ResolverConfig, TransportConfig, ROOT_SERVERS};
use warren_resolver::recursive::Resolver;
use warren_resolver::transport::NetTransport;
use warren_types::protocol::types::{
    DomainName, Message, QueryClass, QueryType, Question, RecordClass, RecordType,
    RecordTypeWithData, ResourceRecord,
};

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            rr.name,
            rr.ttl,
            rr.rclass,
            rr.rtype_with_data.rtype(),
            display_rdata(&rr.rtype_with_data)
        );
    }
}

fn display_rdata(rtype_with_data: &RecordTypeWithData) -> String {
    match rtype_with_data {
        RecordTypeWithData::A { address } => address.to_string(),
        RecordTypeWithData::NS { nsdname } => nsdname.to_string(),
        RecordTypeWithData::CNAME { cname } => cname.to_string(),
        RecordTypeWithData::SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"),
        RecordTypeWithData::WKS {
            address,
            protocol,
            bitmap,
        } => format!("{address} {protocol} ({} octets of port bitmap)", bitmap.len()),
        RecordTypeWithData::PTR { ptrdname } => ptrdname.to_string(),
        RecordTypeWithData::HINFO { cpu, os } => format!(
            "\"{}\" \"{}\"",
            String::from_utf8_lossy(cpu),
            String::from_utf8_lossy(os)
        ),
        RecordTypeWithData::MX {
            preference,
            exchange,
        } => format!("{preference} {exchange}"),
        RecordTypeWithData::TXT { strings } => strings
            .iter()
            .map(|s| format!("\"{}\"", String::from_utf8_lossy(s)))
            .collect::<Vec<String>>()
            .join(" "),
        RecordTypeWithData::AAAA { address } => address.to_string(),
        RecordTypeWithData::Unknown { octets, .. } => {
            let hex: Vec<String> = octets.iter().map(|o| format!("{o:02x}")).collect();
            format!("\\# {} {}", octets.len(), hex.join(""))
        }
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// Recursive DNS lookup utility.
///
/// Resolves a name by walking the hierarchy from the root servers,
/// the same way warrend does, and prints the final response.
struct Args {
    /// Domain name to resolve
    #[clap(value_parser)]
    domain: DomainName,

    /// Query type to resolve
    #[clap(default_value_t = QueryType::Record(RecordType::A), value_parser)]
    qtype: QueryType,

    /// Per-nameserver timeout, in seconds
    #[clap(long, value_parser, default_value_t = 5)]
    timeout: u64,

    /// Root nameserver to start from, can be specified more than
    /// once; defaults to the IANA roots
    #[clap(long, value_parser)]
    root_server: Vec<Ipv4Addr>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let question = Question {
        name: args.domain.clone(),
        qtype: args.qtype,
        qclass: QueryClass::Record(RecordClass::IN),
    };

    println!(";; QUESTION");
    println!("{}\t{}\t{}", question.name, question.qclass, question.qtype);

    let config = ResolverConfig {
        use_cache: false,
        root_servers: if args.root_server.is_empty() {
            ROOT_SERVERS.to_vec()
        } else {
            args.root_server
        },
        transport: TransportConfig {
            timeout: Duration::from_secs(args.timeout),
            ..TransportConfig::default()
        },
    };
    let resolver = Resolver::new(config, SharedCache::new(), NetTransport::new());

    match resolver
        .query(args.domain, args.qtype, question.qclass)
        .await
    {
        Ok(Message {
            answers,
            authority,
            additional,
            ..
        }) => {
            print_section("ANSWER", &answers);
            print_section("AUTHORITY", &authority);
            print_section("ADDITIONAL", &additional);
        }
        Err(error) => {
            println!("\n;; ANSWER");
            println!("; {error}");
            process::exit(1);
        }
    }
}
