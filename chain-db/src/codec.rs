//! Value encoding shared by every store

use crate::DbResult;
use serde::{de::DeserializeOwned, Serialize};

/// Encode a value with bincode's standard configuration
pub fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

/// Decode a value written by [`encode`]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        let bytes = encode(&(7u64, "seven".to_string())).unwrap();
        let (n, s): (u64, String) = decode(&bytes).unwrap();
        assert_eq!((n, s.as_str()), (7, "seven"));

        assert!(decode::<(u64, String)>(&[0xff]).is_err());
    }
}
