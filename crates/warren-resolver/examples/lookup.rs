//! Resolve a name from the command line, starting at the root
//! servers:
//!
//! ```text
//! cargo run --example lookup -- www.example.com.
//! ```

use std::process;

use warren_resolver::cache::SharedCache;
use warren_resolver::config::ResolverConfig;
use warren_resolver::recursive::Resolver;
use warren_resolver::transport::NetTransport;
use warren_types::protocol::types::DomainName;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let Some(arg) = std::env::args().nth(1) else {
        eprintln!("usage: lookup <domain>");
        process::exit(2);
    };
    let Some(name) = DomainName::from_dotted_string(&arg) else {
        eprintln!("'{arg}' is not a domain name");
        process::exit(2);
    };

    let resolver = Resolver::new(
        ResolverConfig::default(),
        SharedCache::new(),
        NetTransport::new(),
    );

    match resolver.resolve_a(&name).await {
        Ok(addresses) => {
            for address in addresses {
                println!("{address}");
            }
        }
        Err(error) => {
            eprintln!("could not resolve {name}: {error}");
            process::exit(1);
        }
    }
}
