//! Serde helpers for the beacon API JSON conventions.

/// `u64` carried as a decimal string; bare numbers are accepted on input.
pub mod quoted_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum QuotedOrBare {
        Quoted(String),
        Bare(u64),
    }

    /// Serialize as a decimal string.
    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize from a decimal string or a number.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match QuotedOrBare::deserialize(deserializer)? {
            QuotedOrBare::Quoted(s) => s.parse().map_err(de::Error::custom),
            QuotedOrBare::Bare(n) => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::quoted_u64")]
        value: u64,
    }

    #[test]
    fn accepts_quoted_and_bare() {
        let a: Wrapper = serde_json::from_str(r#"{"value":"42"}"#).unwrap();
        let b: Wrapper = serde_json::from_str(r#"{"value":42}"#).unwrap();
        assert_eq!(a.value, 42);
        assert_eq!(b.value, 42);
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"value":"42"}"#);
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"value":"x1"}"#).is_err());
    }
}
