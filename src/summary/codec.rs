//! Flat key-value encoding of a [`StreamSummary`].
//!
//! A summary saved under `prefix` occupies five records:
//!
//! | Key                    | Type   | Content                                              |
//! |------------------------|--------|------------------------------------------------------|
//! | `<prefix>Cap`          | string | capacity                                             |
//! | `<prefix>BucketCount`  | string | next bucket id                                       |
//! | `<prefix>CountersMap`  | hash   | item -> counter id                                   |
//! | `<prefix>Counters`     | hash   | counter id -> `prev,next,id,bucket,item,error,count` |
//! | `<prefix>Buckets`      | list   | `bucket_id,count,member_count,last_member` per bucket, tail to head |
//!
//! Missing neighbors are written as `-1`. Item text may itself contain
//! commas; the counter record is split on its four leading and two trailing
//! fields.
//!
//! An [`ExactFrequencies`] table is a single hash `<prefix>Counts` of
//! item -> count.

use super::arena::{BucketId, CounterId};
use super::bucket::Bucket;
use super::counter::Counter;
use super::exact::ExactFrequencies;
use super::linked_list::{Chain, Links};
use super::stream_summary::StreamSummary;
use crate::error::TopKError;
use crate::lock::DistributedLock;
use crate::store::KvStore;
use ahash::AHashMap;
use std::str::FromStr;
use tracing::debug;

const KEY_CAP: &str = "Cap";
const KEY_BUCKET_COUNT: &str = "BucketCount";
const KEY_COUNTERS_MAP: &str = "CountersMap";
const KEY_COUNTERS: &str = "Counters";
const KEY_BUCKETS: &str = "Buckets";
const KEY_COUNTS: &str = "Counts";

/// Store keys of one persisted summary
#[derive(Debug, Clone)]
pub struct RecordKeys {
    pub cap: String,
    pub bucket_count: String,
    pub counters_map: String,
    pub counters: String,
    pub buckets: String,
}

impl RecordKeys {
    pub fn new(prefix: &str) -> Self {
        RecordKeys {
            cap: format!("{}{}", prefix, KEY_CAP),
            bucket_count: format!("{}{}", prefix, KEY_BUCKET_COUNT),
            counters_map: format!("{}{}", prefix, KEY_COUNTERS_MAP),
            counters: format!("{}{}", prefix, KEY_COUNTERS),
            buckets: format!("{}{}", prefix, KEY_BUCKETS),
        }
    }

    pub fn all(&self) -> [&str; 5] {
        [
            self.cap.as_str(),
            self.bucket_count.as_str(),
            self.counters_map.as_str(),
            self.counters.as_str(),
            self.buckets.as_str(),
        ]
    }
}

#[derive(Debug)]
struct CounterRecord {
    prev: Option<u64>,
    next: Option<u64>,
    id: u64,
    bucket: u64,
    item: String,
    error: u64,
    count: u64,
}

#[derive(Debug)]
struct BucketRecord {
    id: u64,
    count: u64,
    len: usize,
    last: Option<u64>,
}

fn parse_num<T: FromStr>(key: &str, field: &str, raw: &str) -> Result<T, TopKError> {
    raw.trim()
        .parse()
        .map_err(|_| TopKError::codec(key, format!("bad {} '{}'", field, raw)))
}

fn parse_link(key: &str, field: &str, raw: &str) -> Result<Option<u64>, TopKError> {
    if raw.trim() == "-1" {
        return Ok(None);
    }
    parse_num(key, field, raw).map(Some)
}

fn format_link(id: Option<CounterId>) -> String {
    match id {
        Some(id) => id.0.to_string(),
        None => "-1".to_string(),
    }
}

impl CounterRecord {
    fn parse(key: &str, raw: &str) -> Result<Self, TopKError> {
        let mut head = raw.splitn(5, ',');
        let (Some(prev), Some(next), Some(id), Some(bucket), Some(rest)) =
            (head.next(), head.next(), head.next(), head.next(), head.next())
        else {
            return Err(TopKError::codec(key, format!("short counter record '{}'", raw)));
        };
        let mut tail = rest.rsplitn(3, ',');
        let (Some(count), Some(error), Some(item)) = (tail.next(), tail.next(), tail.next())
        else {
            return Err(TopKError::codec(key, format!("short counter record '{}'", raw)));
        };

        Ok(CounterRecord {
            prev: parse_link(key, "prev", prev)?,
            next: parse_link(key, "next", next)?,
            id: parse_num(key, "counter id", id)?,
            bucket: parse_num(key, "bucket id", bucket)?,
            item: item.to_string(),
            error: parse_num(key, "error", error)?,
            count: parse_num(key, "count", count)?,
        })
    }
}

impl BucketRecord {
    fn parse(key: &str, raw: &str) -> Result<Self, TopKError> {
        let fields: Vec<&str> = raw.split(',').collect();
        let [id, count, len, last] = fields.as_slice() else {
            return Err(TopKError::codec(key, format!("bucket record '{}' needs 4 fields", raw)));
        };
        Ok(BucketRecord {
            id: parse_num(key, "bucket id", id)?,
            count: parse_num(key, "count", count)?,
            len: parse_num(key, "member count", len)?,
            last: parse_link(key, "last member", last)?,
        })
    }
}

impl StreamSummary {
    /// Persist under `prefix`, replacing whatever was stored there.
    ///
    /// Holds the lock on `prefix` while writing.
    pub fn save<S: KvStore, L: DistributedLock>(
        &self,
        store: &S,
        lock: &L,
        prefix: &str,
    ) -> Result<(), TopKError> {
        let Some(_guard) = lock.lock_default(prefix) else {
            return Err(TopKError::LockUnavailable(prefix.to_string()));
        };
        self.write_records(store, prefix)
    }

    fn write_records<S: KvStore>(&self, store: &S, prefix: &str) -> Result<(), TopKError> {
        let keys = RecordKeys::new(prefix);
        store.set(&keys.cap, &self.capacity.to_string())?;
        store.set(&keys.bucket_count, &self.next_bucket_id.to_string())?;
        store.del(&[
            keys.counters_map.as_str(),
            keys.counters.as_str(),
            keys.buckets.as_str(),
        ])?;

        let index: Vec<(String, String)> = self
            .index
            .iter()
            .map(|(item, id)| (item.clone(), id.0.to_string()))
            .collect();
        store.hset_all(&keys.counters_map, &index)?;

        for (_, bucket) in self.chain.iter_backward(&self.buckets) {
            let record = format!(
                "{},{},{},{}",
                bucket.id,
                bucket.count,
                bucket.len(),
                format_link(bucket.members.last())
            );
            store.rpush(&keys.buckets, &record)?;
        }

        let counters: Vec<(String, String)> = self
            .counters
            .iter()
            .map(|(id, counter)| {
                let record = format!(
                    "{},{},{},{},{},{},{}",
                    format_link(counter.links.prev),
                    format_link(counter.links.next),
                    id.0,
                    self.buckets[counter.bucket].id,
                    counter.item,
                    counter.error,
                    counter.count
                );
                (id.0.to_string(), record)
            })
            .collect();
        store.hset_all(&keys.counters, &counters)?;

        debug!(
            prefix,
            items = self.len(),
            buckets = self.bucket_count(),
            "saved stream summary"
        );
        Ok(())
    }

    /// Rebuild a summary saved under `prefix`, or an empty one of
    /// `default_capacity` when nothing is stored there.
    pub fn load<S: KvStore>(
        store: &S,
        prefix: &str,
        default_capacity: usize,
    ) -> Result<Self, TopKError> {
        let keys = RecordKeys::new(prefix);
        let Some(raw_cap) = store.get(&keys.cap)? else {
            return Ok(StreamSummary::new(default_capacity));
        };

        let mut summary = StreamSummary::new(parse_num(&keys.cap, "capacity", &raw_cap)?);
        if let Some(raw) = store.get(&keys.bucket_count)? {
            summary.next_bucket_id = parse_num(&keys.bucket_count, "bucket count", &raw)?;
        }

        // Counters first, with a placeholder owner until buckets exist.
        let mut records = Vec::new();
        for (_, raw) in store.hgetall(&keys.counters)? {
            records.push(CounterRecord::parse(&keys.counters, &raw)?);
        }
        let mut counter_ids: AHashMap<u64, CounterId> = AHashMap::with_capacity(records.len());
        for record in &records {
            let mut counter = Counter::new(record.item.clone(), BucketId(usize::MAX));
            counter.count = record.count;
            counter.error = record.error;
            let id = summary.counters.insert(counter);
            if counter_ids.insert(record.id, id).is_some() {
                return Err(TopKError::codec(
                    &keys.counters,
                    format!("duplicate counter id {}", record.id),
                ));
            }
        }
        let resolve = |persisted: Option<u64>| -> Result<Option<CounterId>, TopKError> {
            match persisted {
                None => Ok(None),
                Some(old) => counter_ids.get(&old).copied().map(Some).ok_or_else(|| {
                    TopKError::codec(&keys.counters, format!("dangling counter id {}", old))
                }),
            }
        };
        for record in &records {
            let links = Links {
                prev: resolve(record.prev)?,
                next: resolve(record.next)?,
            };
            summary.counters[counter_ids[&record.id]].links = links;
        }

        // Buckets arrive tail first; each one goes in front of the previous.
        let mut bucket_ids: AHashMap<u64, BucketId> = AHashMap::new();
        let mut previous: Option<BucketId> = None;
        for position in 0..store.llen(&keys.buckets)? {
            let Some(raw) = store.lindex(&keys.buckets, position)? else {
                break;
            };
            let record = BucketRecord::parse(&keys.buckets, &raw)?;
            let mut bucket = Bucket::new(record.id, record.count);
            bucket.members = Chain::from_raw(resolve(record.last)?, record.len);
            let id = summary
                .chain
                .insert_before(&mut summary.buckets, bucket, previous);
            if bucket_ids.insert(record.id, id).is_some() {
                return Err(TopKError::codec(
                    &keys.buckets,
                    format!("duplicate bucket id {}", record.id),
                ));
            }
            previous = Some(id);
        }

        for record in &records {
            let Some(&owner) = bucket_ids.get(&record.bucket) else {
                return Err(TopKError::codec(
                    &keys.counters,
                    format!("counter {} names unknown bucket {}", record.id, record.bucket),
                ));
            };
            summary.counters[counter_ids[&record.id]].bucket = owner;
        }

        for (item, raw_id) in store.hgetall(&keys.counters_map)? {
            let old: u64 = parse_num(&keys.counters_map, "counter id", &raw_id)?;
            let Some(id) = resolve(Some(old))? else {
                continue;
            };
            summary.index.insert(item, id);
        }

        summary
            .check_structure()
            .map_err(|reason| TopKError::codec(prefix, reason))?;
        Ok(summary)
    }

    /// Delete every record saved under `prefix`. Holds the lock on `prefix`.
    pub fn clear_keys<S: KvStore, L: DistributedLock>(
        store: &S,
        lock: &L,
        prefix: &str,
    ) -> Result<(), TopKError> {
        let Some(_guard) = lock.lock_default(prefix) else {
            return Err(TopKError::LockUnavailable(prefix.to_string()));
        };
        let keys = RecordKeys::new(prefix);
        store.del(&keys.all())?;
        Ok(())
    }
}

impl ExactFrequencies {
    /// Store key of a table saved under `prefix`.
    pub fn record_key(prefix: &str) -> String {
        format!("{}{}", prefix, KEY_COUNTS)
    }

    /// Persist under `prefix`, replacing whatever was stored there.
    pub fn save<S: KvStore, L: DistributedLock>(
        &self,
        store: &S,
        lock: &L,
        prefix: &str,
    ) -> Result<(), TopKError> {
        let Some(_guard) = lock.lock_default(prefix) else {
            return Err(TopKError::LockUnavailable(prefix.to_string()));
        };
        let key = Self::record_key(prefix);
        store.del(&[key.as_str()])?;
        let counts: Vec<(String, String)> = self
            .items_freqs()
            .into_iter()
            .map(|(item, count)| (item, count.to_string()))
            .collect();
        store.hset_all(&key, &counts)?;
        debug!(prefix, items = counts.len(), "saved exact table");
        Ok(())
    }

    /// Rebuild a table saved under `prefix`; empty when nothing is stored.
    pub fn load<S: KvStore>(store: &S, prefix: &str) -> Result<Self, TopKError> {
        let key = Self::record_key(prefix);
        let mut table = ExactFrequencies::new();
        for (item, raw) in store.hgetall(&key)? {
            let count: u64 = parse_num(&key, "count", &raw)?;
            table.offer(&item, count);
        }
        Ok(table)
    }

    /// Delete the table saved under `prefix`. Holds the lock on `prefix`.
    pub fn clear_keys<S: KvStore, L: DistributedLock>(
        store: &S,
        lock: &L,
        prefix: &str,
    ) -> Result<(), TopKError> {
        let Some(_guard) = lock.lock_default(prefix) else {
            return Err(TopKError::LockUnavailable(prefix.to_string()));
        };
        store.del(&[Self::record_key(prefix).as_str()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::lock::{FlakyLock, FlakyLockConfig, StoreLock};
    use crate::store::InMemoryStore;

    fn fixture() -> (InMemoryStore, StoreLock<InMemoryStore>) {
        let store = InMemoryStore::new();
        let lock = StoreLock::new(store.clone(), LockConfig::test());
        (store, lock)
    }

    #[test]
    fn test_load_missing_gives_empty() {
        let (store, _) = fixture();
        let summary = StreamSummary::load(&store, "nothing", 7).unwrap();
        assert!(summary.is_empty());
        assert_eq!(summary.capacity(), 7);
    }

    #[test]
    fn test_save_writes_five_records() {
        let (store, lock) = fixture();
        let mut summary = StreamSummary::new(4);
        summary.offer("a", 2);
        summary.offer("b", 1);
        summary.save(&store, &lock, "W").unwrap();

        assert_eq!(store.get("WCap").unwrap().as_deref(), Some("4"));
        assert_eq!(store.llen("WBuckets").unwrap(), 2);
        assert_eq!(store.hgetall("WCounters").unwrap().len(), 2);
        assert_eq!(store.hgetall("WCountersMap").unwrap().len(), 2);
        assert!(store.exists("WBucketCount").unwrap());
        // Lock released after saving
        assert!(!store.exists("W").unwrap());

        // Tail bucket is written first
        let first = store.lindex("WBuckets", 0).unwrap().unwrap();
        assert_eq!(first.split(',').nth(1), Some("1"));
    }

    #[test]
    fn test_round_trip_preserves_queries() {
        let (store, lock) = fixture();
        let mut summary = StreamSummary::new(3);
        for item in ["x", "y", "x", "z", "w", "x", "y", "v"] {
            summary.offer(item, 1);
        }
        summary.save(&store, &lock, "p").unwrap();
        let loaded = StreamSummary::load(&store, "p", 99).unwrap();

        assert_eq!(loaded.capacity(), 3);
        assert_eq!(loaded.top_k(3), summary.top_k(3));
        assert_eq!(loaded.items_freqs(), summary.items_freqs());
        for k in 0..5 {
            assert_eq!(loaded.get_k_order_stat(k), summary.get_k_order_stat(k));
        }
        for item in ["x", "y", "z", "w", "v"] {
            assert_eq!(loaded.get_freq(item), summary.get_freq(item));
            assert_eq!(loaded.error_of(item), summary.error_of(item));
        }
    }

    #[test]
    fn test_loaded_summary_keeps_evolving() {
        let (store, lock) = fixture();
        let mut summary = StreamSummary::new(2);
        summary.offer("a", 3);
        summary.offer("b", 1);
        summary.save(&store, &lock, "p").unwrap();

        let mut loaded = StreamSummary::load(&store, "p", 2).unwrap();
        loaded.offer("c", 1);
        assert!(!loaded.key_exists("b"));
        assert_eq!(loaded.get_freq("c"), 2);
        loaded.check_structure().unwrap();
    }

    #[test]
    fn test_items_with_commas() {
        let (store, lock) = fixture();
        let mut summary = StreamSummary::new(5);
        summary.offer("hello, world", 2);
        summary.offer(",", 1);
        summary.save(&store, &lock, "c").unwrap();

        let loaded = StreamSummary::load(&store, "c", 5).unwrap();
        assert_eq!(loaded.get_freq("hello, world"), 2);
        assert_eq!(loaded.get_freq(","), 1);
    }

    #[test]
    fn test_save_replaces_previous() {
        let (store, lock) = fixture();
        let mut big = StreamSummary::new(10);
        for item in ["a", "b", "c", "d"] {
            big.offer(item, 1);
        }
        big.save(&store, &lock, "p").unwrap();

        let mut small = StreamSummary::new(10);
        small.offer("z", 4);
        small.save(&store, &lock, "p").unwrap();

        let loaded = StreamSummary::load(&store, "p", 10).unwrap();
        assert_eq!(loaded.items_freqs(), vec![("z".to_string(), 4)]);
    }

    #[test]
    fn test_malformed_records() {
        let (store, _) = fixture();
        store.set("badCap", "ten").unwrap();
        assert!(matches!(
            StreamSummary::load(&store, "bad", 1),
            Err(TopKError::Codec { .. })
        ));

        store.set("danglingCap", "4").unwrap();
        store.hset("danglingCounters", "0", "7,-1,0,0,a,0,1").unwrap();
        store.rpush("danglingBuckets", "0,1,1,0").unwrap();
        match StreamSummary::load(&store, "dangling", 1) {
            Err(TopKError::Codec { key, reason }) => {
                assert_eq!(key, "danglingCounters");
                assert!(reason.contains("dangling"), "{}", reason);
            }
            other => panic!("expected codec error, got {:?}", other.map(|s| s.len())),
        }

        // Records parse but the index is missing: structure check rejects it
        store.set("unindexedCap", "4").unwrap();
        store.hset("unindexedCounters", "0", "-1,-1,0,0,a,0,1").unwrap();
        store.rpush("unindexedBuckets", "0,1,1,0").unwrap();
        assert!(matches!(
            StreamSummary::load(&store, "unindexed", 1),
            Err(TopKError::Codec { .. })
        ));
    }

    #[test]
    fn test_clear_keys() {
        let (store, lock) = fixture();
        let mut summary = StreamSummary::new(3);
        summary.offer("a", 1);
        summary.save(&store, &lock, "p").unwrap();
        store.set("unrelated", "1").unwrap();

        StreamSummary::clear_keys(&store, &lock, "p").unwrap();
        assert_eq!(store.keys(), vec!["unrelated".to_string()]);
    }

    #[test]
    fn test_save_without_lock_fails() {
        let (store, lock) = fixture();
        let flaky = FlakyLock::new(lock, FlakyLockConfig::always_fail(0));
        let summary = StreamSummary::new(3);
        assert!(matches!(
            summary.save(&store, &flaky, "p"),
            Err(TopKError::LockUnavailable(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_exact_table_round_trip() {
        let (store, lock) = fixture();
        let mut table = ExactFrequencies::new();
        table.offer("a, b", 3);
        table.offer("c", 1);
        table.save(&store, &lock, "e").unwrap();
        assert_eq!(store.keys(), vec!["eCounts".to_string()]);

        let loaded = ExactFrequencies::load(&store, "e").unwrap();
        assert_eq!(loaded.items_freqs(), table.items_freqs());
        assert_eq!(loaded.total(), 4);

        ExactFrequencies::clear_keys(&store, &lock, "e").unwrap();
        assert!(store.is_empty());
        assert!(ExactFrequencies::load(&store, "e").unwrap().is_empty());
    }

    #[test]
    fn test_exact_table_bad_count() {
        let (store, _) = fixture();
        store.hset("eCounts", "a", "-1").unwrap();
        assert!(matches!(
            ExactFrequencies::load(&store, "e"),
            Err(TopKError::Codec { .. })
        ));
    }
}
