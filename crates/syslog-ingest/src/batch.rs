// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size-bounded, append-only record batches.
//!
//! A batch never holds more than its capacity. The append that fills it
//! returns [`RotationSignal::Full`]; the owner must then [`RecordBatch::rotate`]
//! it, which hands back the frozen batch and leaves an empty successor in place.

use crate::errors;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationSignal {
    None,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    records: Vec<Record>,
    capacity: usize,
    sequence: u64,
}

impl RecordBatch {
    pub fn new(capacity: usize) -> Result<Self, errors::Creation> {
        if capacity == 0 {
            return Err(errors::Creation::ZeroCapacity);
        }
        Ok(Self::with_sequence(capacity, 0))
    }

    fn with_sequence(capacity: usize, sequence: u64) -> Self {
        RecordBatch {
            records: Vec::new(),
            capacity,
            sequence,
        }
    }

    /// Appends a record and reports whether the batch is now full.
    ///
    /// A full batch rejects further appends and returns the record to the
    /// caller instead of growing past capacity.
    pub fn append(&mut self, record: Record) -> Result<RotationSignal, Record> {
        if self.is_full() {
            return Err(record);
        }
        self.records.push(record);
        if self.is_full() {
            Ok(RotationSignal::Full)
        } else {
            Ok(RotationSignal::None)
        }
    }

    /// Replaces this batch with an empty one and returns the old contents.
    #[must_use]
    pub fn rotate(&mut self) -> RecordBatch {
        let next = Self::with_sequence(self.capacity, self.sequence + 1);
        std::mem::replace(self, next)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Position of this batch in the rotation order, starting at 0.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
