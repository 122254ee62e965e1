use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock instant in microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        Self(micros)
    }

    /// `now`, but never earlier than `floor`; keeps effective intervals ordered under clock skew.
    pub fn now_at_least(floor: Timestamp) -> Self {
        Self::now().max(floor)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }
}
