//! Bounded, insertion-ordered history of calibrated samples.
//!
//! Backed by a fixed-capacity ring: once full, each append overwrites the
//! oldest slot and advances the head, so both append and eviction are O(1)
//! and no sample is ever moved or mutated after insertion.

use crate::calibration::CalibratedSample;

/// Scalar series that can be charted from the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Ph,
    Turbidity,
    Oxygen,
    Temperature,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Ph, Field::Turbidity, Field::Oxygen, Field::Temperature];

    /// Key used by the dashboard's JSON.
    pub fn key(self) -> &'static str {
        match self {
            Field::Ph => "ph",
            Field::Turbidity => "turb",
            Field::Oxygen => "oks",
            Field::Temperature => "suhu",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn of(self, sample: &CalibratedSample) -> f64 {
        match self {
            Field::Ph => sample.ph,
            Field::Turbidity => sample.turbidity,
            Field::Oxygen => sample.oxygen,
            Field::Temperature => sample.temperature,
        }
    }
}

pub struct HistoryBuffer {
    slots: Vec<CalibratedSample>,
    /// Index of the oldest sample once the ring is full; 0 until then.
    head: usize,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn append(&mut self, sample: CalibratedSample) {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.head] = sample;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &CalibratedSample> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// One field across all retained samples, oldest first.
    pub fn snapshot(&self, field: Field) -> Vec<f64> {
        self.iter().map(|s| field.of(s)).collect()
    }

    /// Most recent sample, or `None` before the first commit.
    pub fn latest(&self) -> Option<CalibratedSample> {
        if self.slots.is_empty() {
            return None;
        }
        let newest = (self.head + self.slots.len() - 1) % self.slots.len();
        Some(self.slots[newest])
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(t: f64) -> CalibratedSample {
        CalibratedSample {
            ph: 7.0,
            turbidity: 1.0,
            oxygen: 8.0,
            temperature: t,
        }
    }

    #[test]
    fn empty_buffer_has_no_latest() {
        let h = HistoryBuffer::new(30);
        assert!(h.is_empty());
        assert_eq!(h.latest(), None);
        assert!(h.snapshot(Field::Temperature).is_empty());
    }

    #[test]
    fn latest_tracks_newest_before_and_after_wrap() {
        let mut h = HistoryBuffer::new(3);
        h.append(sample(1.0));
        assert_eq!(h.latest().unwrap().temperature, 1.0);
        for t in 2..=7 {
            h.append(sample(f64::from(t)));
            assert_eq!(h.latest().unwrap().temperature, f64::from(t));
        }
    }

    #[test]
    fn thirty_one_appends_keep_the_last_thirty() {
        let mut h = HistoryBuffer::new(30);
        for t in 0..=30 {
            h.append(sample(f64::from(t)));
        }
        let temps = h.snapshot(Field::Temperature);
        assert_eq!(temps.len(), 30);
        assert_eq!(temps[0], 1.0);
        assert_eq!(temps[29], 30.0);
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let mut h = HistoryBuffer::new(0);
        h.append(sample(1.0));
        h.append(sample(2.0));
        assert_eq!(h.snapshot(Field::Temperature), vec![2.0]);
    }

    #[test]
    fn field_keys_round_trip() {
        for f in Field::ALL {
            assert_eq!(Field::from_key(f.key()), Some(f));
        }
        assert_eq!(Field::from_key("humidity"), None);
    }

    proptest! {
        #[test]
        fn keeps_exactly_the_last_k_in_order(capacity in 1usize..50, count in 0usize..200) {
            let mut h = HistoryBuffer::new(capacity);
            for i in 0..count {
                h.append(sample(i as f64));
                prop_assert!(h.len() <= capacity);
            }
            let expected: Vec<f64> = (count.saturating_sub(capacity)..count).map(|i| i as f64).collect();
            prop_assert_eq!(h.snapshot(Field::Temperature), expected);
        }
    }
}
