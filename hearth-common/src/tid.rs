use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

pub const TID_LEN: usize = 13;
const S32_CHAR: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";

/// 54 bits of microseconds, 10 bits of clock id.
const TIMESTAMP_MASK: u64 = (1 << 54) - 1;
const CLOCK_ID_MASK: u64 = (1 << 10) - 1;

#[derive(Error, Debug)]
pub enum TidError {
    #[error("poorly formatted TID: expected {TID_LEN} chars, got {0}")]
    BadLength(usize),
    #[error("invalid TID character: `{0}`")]
    BadChar(char),
}

pub fn s32encode(mut i: u64) -> String {
    let mut s = String::new();
    while i > 0 {
        let c = (i % 32) as usize;
        i /= 32;
        s.insert(0, S32_CHAR[c] as char);
    }
    s
}

pub fn s32decode(s: &str) -> Result<u64, TidError> {
    let mut i: u64 = 0;
    for c in s.chars() {
        let pos = S32_CHAR
            .iter()
            .position(|&x| x as char == c)
            .ok_or(TidError::BadChar(c))?;
        i = i * 32 + pos as u64;
    }
    Ok(i)
}

/// Timestamp identifier: a 64-bit value rendered as 13 sortable base32 chars.
/// Lexicographic order on the text form equals numeric order on the value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(String);

impl Tid {
    pub fn new(s: String) -> Result<Self, TidError> {
        let no_dashes = s.replace('-', "");
        if no_dashes.len() != TID_LEN {
            return Err(TidError::BadLength(no_dashes.len()));
        }
        s32decode(&no_dashes)?;
        Ok(Tid(no_dashes))
    }

    pub fn from_time(timestamp: u64, clock_id: u64) -> Self {
        let packed = ((timestamp & TIMESTAMP_MASK) << 10) | (clock_id & CLOCK_ID_MASK);
        let encoded = s32encode(packed);
        // left-pad so every TID is exactly 13 chars and sorts by value
        let mut s = String::with_capacity(TID_LEN);
        for _ in encoded.len()..TID_LEN {
            s.push(S32_CHAR[0] as char);
        }
        s.push_str(&encoded);
        Tid(s)
    }

    /// Microseconds since the epoch.
    pub fn timestamp(&self) -> u64 {
        self.packed() >> 10
    }

    pub fn clock_id(&self) -> u64 {
        self.packed() & CLOCK_ID_MASK
    }

    fn packed(&self) -> u64 {
        s32decode(&self.0).expect("validated on construction")
    }

    pub fn newer_than(&self, other: &Tid) -> bool {
        self.0 > other.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Tid {
    type Err = TidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tid::new(s.to_owned())
    }
}

/// Process-wide TID source. Strictly monotonic: a wall-clock regress bumps
/// the previous timestamp by one microsecond instead of going backwards.
pub struct Ticker {
    last_timestamp: u64,
    clock_id: u64,
}

impl Ticker {
    pub fn new() -> Self {
        let mut ticker = Self {
            last_timestamp: 0,
            clock_id: rand::random::<u64>() & CLOCK_ID_MASK,
        };
        // prime the pump
        ticker.next(None);
        ticker
    }

    pub fn next(&mut self, prev: Option<&Tid>) -> Tid {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("timestamp in micros since UNIX epoch")
            .as_micros() as u64
            & TIMESTAMP_MASK;
        if now > self.last_timestamp {
            self.last_timestamp = now;
        } else {
            self.last_timestamp += 1;
        }
        let tid = Tid::from_time(self.last_timestamp, self.clock_id);
        match prev {
            Some(prev) if !tid.newer_than(prev) => {
                Tid::from_time(prev.timestamp() + 1, self.clock_id)
            }
            _ => tid,
        }
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl serde::Serialize for Tid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Tid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Tid::new(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_is_13_chars() {
        let mut ticker = Ticker::new();
        let tid = ticker.next(None);
        assert_eq!(tid.to_string().len(), TID_LEN);
        let small = Tid::from_time(1, 0);
        assert_eq!(small.to_string().len(), TID_LEN);
    }

    #[test]
    fn timestamp_round_trips() {
        let tid = Tid::from_time(1_700_000_000_000_000, 321);
        assert_eq!(tid.timestamp(), 1_700_000_000_000_000);
        assert_eq!(tid.clock_id(), 321);
        let parsed: Tid = tid.to_string().parse().unwrap();
        assert_eq!(parsed, tid);
    }

    #[test]
    fn ticker_is_strictly_monotonic() {
        let mut ticker = Ticker::new();
        let mut prev = ticker.next(None);
        for _ in 0..1000 {
            let next = ticker.next(None);
            assert!(next.newer_than(&prev), "{next} !> {prev}");
            prev = next;
        }
    }

    #[test]
    fn lexicographic_order_matches_numeric_order() {
        let pairs = [
            (0u64, 0u64),
            (1, 0),
            (31, 1023),
            (32, 0),
            (1 << 30, 5),
            ((1 << 54) - 1, 1023),
        ];
        let mut tids: Vec<Tid> = pairs
            .iter()
            .map(|&(ts, cid)| Tid::from_time(ts, cid))
            .collect();
        let mut sorted = tids.clone();
        sorted.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        tids.sort_by_key(|t| t.packed());
        assert_eq!(tids, sorted);
    }

    #[test]
    fn next_respects_prev() {
        let mut ticker = Ticker::new();
        let future = Tid::from_time((1 << 54) - 10, ticker.clock_id);
        let next = ticker.next(Some(&future));
        assert!(next.newer_than(&future));
        assert_eq!(next.timestamp(), future.timestamp() + 1);
    }

    #[test]
    fn rejects_malformed() {
        assert!(Tid::new("short".to_owned()).is_err());
        assert!(Tid::new("1111111111111".to_owned()).is_err()); // '1' not in alphabet
    }
}
