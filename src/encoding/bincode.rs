use super::EncodingError;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| EncodingError::InvalidFormat(format!("Serialization failed: {}", e)).into())
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| EncodingError::InvalidFormat(format!("Deserialization failed: {}", e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Checkpoint {
        active: Option<String>,
        size: u64,
        closed: BTreeSet<String>,
    }

    #[test]
    fn test_serialize_deserialize() -> Result<()> {
        let original = Checkpoint {
            active: Some("rs-00ff.log".to_string()),
            size: 4096,
            closed: ["rs-0001.log".to_string()].into_iter().collect(),
        };

        let bytes = serialize(&original)?;
        let decoded: Checkpoint = deserialize(&bytes)?;
        assert_eq!(original, decoded);
        Ok(())
    }

    #[test]
    fn test_invalid_data() {
        let invalid_data = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<String> = deserialize(&invalid_data);
        assert!(result.is_err());
    }
}
