//! Per-bucket acceptance quota for collected records.

use std::collections::HashMap;

use tracing::debug;

use trendlyze_shared::{QuotaConfig, Record};

/// Caps how many records are accepted per bucket within one run of one source.
///
/// The bucket is the record's `metaData[bucket_field]`; records without that
/// field share a single global counter. Once a bucket is full it refuses
/// every later record. Accepted records are kept in acceptance order.
#[derive(Debug)]
pub struct QuotaLimiter {
    enabled: bool,
    max_per_bucket: usize,
    bucket_field: String,
    by_bucket: HashMap<String, usize>,
    global: usize,
    accepted: Vec<Record>,
}

impl QuotaLimiter {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_per_bucket: config.max_per_bucket,
            bucket_field: config.bucket_field.clone(),
            by_bucket: HashMap::new(),
            global: 0,
            accepted: Vec::new(),
        }
    }

    /// Bucket key of `record`, if it has one.
    fn bucket_of<'a>(&self, record: &'a Record) -> Option<&'a str> {
        record.meta_data.field(&self.bucket_field)
    }

    /// Offer a record. Returns whether it was accepted (and stored).
    pub fn accept(&mut self, record: Record) -> bool {
        if !self.enabled {
            self.accepted.push(record);
            return true;
        }

        let count = match self.bucket_of(&record) {
            Some(bucket) => self.by_bucket.entry(bucket.to_string()).or_insert(0),
            None => &mut self.global,
        };

        if *count >= self.max_per_bucket {
            debug!(link = %record.link, "quota reached, record refused");
            return false;
        }

        *count += 1;
        self.accepted.push(record);
        true
    }

    /// Whether `bucket` (or the global counter when `None`) is full.
    pub fn is_exceeded(&self, bucket: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        let count = match bucket {
            Some(bucket) => self.by_bucket.get(bucket).copied().unwrap_or(0),
            None => self.global,
        };
        count >= self.max_per_bucket
    }

    /// Accepted records so far.
    pub fn records(&self) -> &[Record] {
        &self.accepted
    }

    /// Consume the limiter, returning accepted records in acceptance order.
    pub fn into_records(self) -> Vec<Record> {
        self.accepted
    }
}
