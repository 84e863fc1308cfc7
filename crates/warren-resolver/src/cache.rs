use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use warren_types::protocol::types::*;

/// A convenience wrapper around a `Cache` which lets it be shared
/// between tasks.
///
/// Invoking `clone` on a `SharedCache` gives a new instance which
/// refers to the same underlying `Cache` object.  The lock is held
/// only for the duration of a single operation, never across an
/// await.
#[derive(Debug, Clone)]
pub struct SharedCache {
    cache: Arc<Mutex<Cache>>,
}

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cache mutex poisoned, cannot recover from this - aborting";

impl SharedCache {
    /// Make a new, empty, shared cache.
    pub fn new() -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::new())),
        }
    }

    /// Create a new cache with the given desired size.
    pub fn with_desired_size(desired_size: usize) -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::with_desired_size(desired_size))),
        }
    }

    /// Get the cached response for a question, if it is still fresh.
    pub fn get(&self, question: &Question) -> Option<Message> {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).get(question)
    }

    /// Insert a response.  Responses with no answer records, or whose
    /// smallest answer TTL is zero, are not cached.
    pub fn insert(&self, question: &Question, message: &Message) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .insert(question, message);
    }

    /// Atomically clears expired entries and, if the cache has grown
    /// beyond its desired size, prunes entries to get down to size.
    ///
    /// Returns `(has overflowed?, current size, num expired, num pruned)`.
    pub fn prune(&self) -> (bool, usize, usize, usize) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).prune()
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Caching for whole response messages, keyed by question.
///
/// An entry is fresh until the smallest TTL among its answer records
/// has elapsed since insertion.  Stale entries are never returned;
/// they linger until the next `prune`, which also evicts
/// least-recently-used entries once the cache has grown beyond its
/// desired size.
///
/// You probably want to use `SharedCache` instead.
#[derive(Debug, Clone)]
pub struct Cache {
    /// Cached responses.
    entries: HashMap<Question, CacheEntry>,

    /// Priority queue of questions ordered by access time.
    ///
    /// When the cache is full and there are no expired entries to
    /// prune, entries are pruned in LRU order.
    ///
    /// INVARIANT: the questions in here are exactly those in
    /// `entries`.
    access_priority: PriorityQueue<Question, Reverse<Instant>>,

    /// Priority queue of questions ordered by expiry time.
    ///
    /// When the cache is pruned, expired entries are removed first.
    ///
    /// INVARIANT: the questions in here are exactly those in
    /// `entries`.
    expiry_priority: PriorityQueue<Question, Reverse<Instant>>,

    /// The desired maximum number of entries.
    desired_size: usize,
}

/// A cached response.
#[derive(Debug, Clone)]
struct CacheEntry {
    message: Message,
    expires_at: Instant,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// Create a new cache with a default desired size.
    pub fn new() -> Self {
        Self::with_desired_size(512)
    }

    /// Create a new cache with the given desired size.
    ///
    /// # Panics
    ///
    /// If called with a `desired_size` of 0.
    pub fn with_desired_size(desired_size: usize) -> Self {
        assert!(desired_size > 0, "cannot create a zero-size cache");

        Self {
            entries: HashMap::with_capacity(desired_size),
            access_priority: PriorityQueue::with_capacity(desired_size),
            expiry_priority: PriorityQueue::with_capacity(desired_size),
            desired_size,
        }
    }

    /// Get the cached response for a question, if it is fresh.
    pub fn get(&mut self, question: &Question) -> Option<Message> {
        let now = Instant::now();
        let entry = self.entries.get(question)?;

        if entry.expires_at <= now {
            return None;
        }

        self.access_priority
            .change_priority(question, Reverse(now));
        Some(entry.message.clone())
    }

    /// Insert a response, replacing any previous entry for the same
    /// question.
    pub fn insert(&mut self, question: &Question, message: &Message) {
        self.insert_at(Instant::now(), question, message);
    }

    fn insert_at(&mut self, now: Instant, question: &Question, message: &Message) {
        let Some(min_ttl) = message.answers.iter().map(|rr| rr.ttl).min() else {
            return;
        };
        if min_ttl == 0 {
            return;
        }

        let expires_at = now + Duration::from_secs(min_ttl.into());
        self.entries.insert(
            question.clone(),
            CacheEntry {
                message: message.clone(),
                expires_at,
            },
        );
        // push also reprioritises an existing entry
        self.access_priority.push(question.clone(), Reverse(now));
        self.expiry_priority
            .push(question.clone(), Reverse(expires_at));
    }

    /// How many responses are cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete all expired entries, then enough least-recently-used
    /// entries to get down to the desired size.
    ///
    /// Returns `(has overflowed?, current size, num expired, num pruned)`.
    pub fn prune(&mut self) -> (bool, usize, usize, usize) {
        let has_overflowed = self.len() > self.desired_size;
        let num_expired = self.remove_expired();
        let mut num_pruned = 0;

        while self.len() > self.desired_size {
            num_pruned += self.remove_least_recently_used();
        }

        (has_overflowed, self.len(), num_expired, num_pruned)
    }

    /// Delete all expired entries, returning how many were removed.
    fn remove_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        while let Some((question, Reverse(expires_at))) = self.expiry_priority.pop() {
            if expires_at > now {
                self.expiry_priority.push(question, Reverse(expires_at));
                break;
            }

            self.entries.remove(&question);
            self.access_priority.remove(&question);
            removed += 1;
        }

        removed
    }

    /// Delete the least recently used entry, returning how many
    /// entries were removed.
    fn remove_least_recently_used(&mut self) -> usize {
        if let Some((question, _)) = self.access_priority.pop() {
            self.expiry_priority.remove(&question);
            self.entries.remove(&question);
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use warren_types::protocol::types::test_util::*;

    use super::*;

    fn question(name: &str) -> Question {
        Question {
            name: domain(name),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        }
    }

    fn response(name: &str, ttl: u32) -> Message {
        let mut message = Message::from_question(1234, question(name)).make_response();
        let mut rr = a_record(name, std::net::Ipv4Addr::new(1, 1, 1, 1));
        rr.ttl = ttl;
        message.answers = vec![rr];
        message
    }

    #[test]
    fn cache_put_can_get() {
        let mut cache = Cache::new();
        let q = question("www.example.com.");
        let message = response("www.example.com.", 300);

        cache.insert(&q, &message);

        assert_eq!(Some(message), cache.get(&q));
        assert_eq!(None, cache.get(&question("other.example.com.")));
        assert_invariants(&cache);
    }

    #[test]
    fn cache_does_not_store_empty_answers() {
        let mut cache = Cache::new();
        let q = question("www.example.com.");
        let message = Message::from_question(1234, q.clone()).make_response();

        cache.insert(&q, &message);

        assert!(cache.is_empty());
    }

    #[test]
    fn cache_does_not_store_zero_ttls() {
        let mut cache = Cache::new();
        let q = question("www.example.com.");

        cache.insert(&q, &response("www.example.com.", 0));

        assert!(cache.is_empty());
        assert_eq!(None, cache.get(&q));
    }

    #[test]
    fn cache_does_not_return_stale_entries() {
        let mut cache = Cache::new();
        let q = question("www.example.com.");
        let message = response("www.example.com.", 5);

        let long_ago = Instant::now() - Duration::from_secs(60);
        cache.insert_at(long_ago, &q, &message);

        assert_eq!(None, cache.get(&q));

        let (_, size, expired, pruned) = cache.prune();
        assert_eq!(0, size);
        assert_eq!(1, expired);
        assert_eq!(0, pruned);
        assert_invariants(&cache);
    }

    #[test]
    fn cache_replaces_same_question() {
        let mut cache = Cache::new();
        let q = question("www.example.com.");

        cache.insert(&q, &response("www.example.com.", 300));
        let newer = response("www.example.com.", 600);
        cache.insert(&q, &newer);

        assert_eq!(1, cache.len());
        assert_eq!(Some(newer), cache.get(&q));
        assert_invariants(&cache);
    }

    #[test]
    fn cache_prunes_least_recently_used_down_to_size() {
        let mut cache = Cache::with_desired_size(25);

        for i in 0..100 {
            let name = format!("host-{i}.example.com.");
            cache.insert(&question(&name), &response(&name, 300));
        }

        // touch an early entry so it is no longer the oldest
        let kept = question("host-0.example.com.");
        assert!(cache.get(&kept).is_some());

        let (overflow, size, expired, pruned) = cache.prune();
        assert!(overflow);
        assert_eq!(25, size);
        assert_eq!(0, expired);
        assert_eq!(75, pruned);
        assert!(cache.get(&kept).is_some());
        assert_invariants(&cache);
    }

    #[test]
    fn cache_prune_expires_before_lru() {
        let mut cache = Cache::with_desired_size(10);
        let long_ago = Instant::now() - Duration::from_secs(60);

        for i in 0..10 {
            let name = format!("stale-{i}.example.com.");
            cache.insert_at(long_ago, &question(&name), &response(&name, 5));
        }
        for i in 0..10 {
            let name = format!("fresh-{i}.example.com.");
            cache.insert(&question(&name), &response(&name, 300));
        }

        let (overflow, size, expired, pruned) = cache.prune();
        assert!(overflow);
        assert_eq!(10, size);
        assert_eq!(10, expired);
        assert_eq!(0, pruned);
        assert_invariants(&cache);
    }

    #[test]
    fn shared_cache_is_shared() {
        let cache = SharedCache::new();
        let other = cache.clone();
        let q = question("www.example.com.");

        cache.insert(&q, &response("www.example.com.", 300));

        assert!(other.get(&q).is_some());
    }

    fn assert_invariants(cache: &Cache) {
        assert_eq!(cache.entries.len(), cache.access_priority.len());
        assert_eq!(cache.entries.len(), cache.expiry_priority.len());

        for question in cache.entries.keys() {
            assert!(cache.access_priority.get(question).is_some());
            assert!(cache.expiry_priority.get(question).is_some());
        }
    }
}
