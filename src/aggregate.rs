//! Accumulation of tag reads within one read operation.

use bytes::Bytes;
use std::collections::HashMap;

use crate::types::{TagProtocol, TagRecord};

/// Which reads of the same EPC count as distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniquenessPolicy {
    pub by_antenna: bool,
    pub by_data: bool,
    pub by_protocol: bool,
    /// Keep the strongest observation instead of the first one.
    pub record_highest_rssi: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    epc: Bytes,
    antenna: Option<u8>,
    data: Option<Bytes>,
    protocol: Option<TagProtocol>,
}

impl DedupKey {
    fn new(record: &TagRecord, policy: &UniquenessPolicy) -> Self {
        Self {
            epc: record.epc.clone(),
            antenna: policy.by_antenna.then_some(record.antenna),
            data: policy.by_data.then(|| record.data.clone()),
            protocol: policy.by_protocol.then_some(record.protocol),
        }
    }
}

#[derive(Debug, Default)]
pub struct TagRecordAggregator {
    policy: UniquenessPolicy,
    index: HashMap<DedupKey, usize>,
    records: Vec<TagRecord>,
}

impl TagRecordAggregator {
    pub fn new(policy: UniquenessPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn insert(&mut self, record: TagRecord) {
        let key = DedupKey::new(&record, &self.policy);
        let Some(slot) = self.index.get(&key).copied() else {
            self.index.insert(key, self.records.len());
            self.records.push(record);
            return;
        };

        let stored = &mut self.records[slot];
        let read_count = stored.read_count + record.read_count.max(1);
        if self.policy.record_highest_rssi && record.rssi > stored.rssi {
            *stored = record;
        }
        stored.read_count = read_count;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Hand out everything gathered so far, in first-seen order.
    pub fn drain(&mut self) -> Vec<TagRecord> {
        self.index.clear();
        std::mem::take(&mut self.records)
    }
}
