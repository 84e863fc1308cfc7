use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::net::Ipv4Addr;

use warren_resolver::cache::Cache;
use warren_types::protocol::types::*;

fn question(name: &str) -> Question {
    Question {
        name: DomainName::from_dotted_string(name).unwrap(),
        qtype: QueryType::Record(RecordType::A),
        qclass: QueryClass::Record(RecordClass::IN),
    }
}

fn response(question: &Question) -> Message {
    let mut message = Message::from_question(1234, question.clone()).make_response();
    message.answers = vec![ResourceRecord {
        name: question.name.clone(),
        rtype_with_data: RecordTypeWithData::A {
            address: Ipv4Addr::new(1, 1, 1, 1),
        },
        rclass: RecordClass::IN,
        ttl: 300,
    }];
    message
}

fn filled_cache(size: usize) -> (Cache, Vec<Question>) {
    let mut cache = Cache::with_desired_size(size);
    let mut questions = Vec::with_capacity(size);
    for i in 0..size {
        let q = question(&format!("host-{i}.example.com."));
        cache.insert(&q, &response(&q));
        questions.push(q);
    }
    (cache, questions)
}

fn bench_insert(c: &mut Criterion) {
    let q = question("www.example.com.");
    let message = response(&q);

    c.bench_function("cache/insert", |b| {
        b.iter_batched(
            || Cache::with_desired_size(512),
            |mut cache| cache.insert(&q, &message),
            BatchSize::SmallInput,
        )
    });
}

fn bench_get(c: &mut Criterion) {
    let (mut cache, questions) = filled_cache(512);

    let mut i = 0;
    c.bench_function("cache/get", |b| {
        b.iter(|| {
            i = (i + 1) % questions.len();
            cache.get(&questions[i])
        })
    });
}

fn bench_prune(c: &mut Criterion) {
    c.bench_function("cache/prune", |b| {
        b.iter_batched(
            || {
                let mut cache = Cache::with_desired_size(128);
                for i in 0..512 {
                    let q = question(&format!("host-{i}.example.com."));
                    cache.insert(&q, &response(&q));
                }
                cache
            },
            |mut cache| cache.prune(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_insert, bench_get, bench_prune);
criterion_main!(benches);
