//! Serde adapter storing a [`Duration`] as whole seconds.
//!
//! Use with `#[serde(with = "camrelay_core::duration_secs")]`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "super")]
        wait: Duration,
    }

    #[test]
    fn stores_whole_seconds() {
        let json = serde_json::to_string(&Timeouts {
            wait: Duration::from_millis(90_500),
        })
        .unwrap();
        assert_eq!(json, r#"{"wait":90}"#);

        let back: Timeouts = serde_json::from_str(r#"{"wait":15}"#).unwrap();
        assert_eq!(back.wait, Duration::from_secs(15));
    }
}
