//! Opaque pagination cursor codec.
//!
//! Feature-list cursors encode the key of the last item of the previous page
//! (a JSON string, base64-wrapped so the cursor stays opaque). Task-list
//! cursors encode the decimal sequence number of the last entry returned.
//! Undecodable cursors are `InvalidParams`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use ferromcp_protocol::{Error, Result};

/// Encode a feature-list cursor from the key of the last item returned.
pub fn encode_name_cursor(name: &str) -> String {
    let json = serde_json::to_vec(name).expect("a string always serializes");
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a feature-list cursor back to the key it encodes.
pub fn decode_name_cursor(cursor: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| Error::invalid_params("invalid cursor"))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::invalid_params("invalid cursor"))
}

/// Encode a task-list cursor from a sequence number.
pub fn encode_sequence_cursor(sequence: u64) -> String {
    sequence.to_string()
}

/// Decode a task-list cursor back to its sequence number.
pub fn decode_sequence_cursor(cursor: &str) -> Result<u64> {
    cursor
        .parse()
        .map_err(|_| Error::invalid_params("invalid cursor"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_cursor_round_trips() {
        for name in ["echo", "", "weird/name with spaces", "ünïcode"] {
            let cursor = encode_name_cursor(name);
            assert_eq!(decode_name_cursor(&cursor).unwrap(), name);
        }
    }

    #[test]
    fn name_cursors_are_opaque() {
        assert_ne!(encode_name_cursor("echo"), "echo");
    }

    #[test]
    fn rubbish_name_cursor_is_invalid_params() {
        for rubbish in ["%%%not-base64%%%", "aGk", "!!"] {
            let err = decode_name_cursor(rubbish).unwrap_err();
            assert_eq!(err.jsonrpc_code(), Some(-32602), "{rubbish}");
        }
    }

    #[test]
    fn sequence_cursor_round_trips() {
        assert_eq!(decode_sequence_cursor(&encode_sequence_cursor(0)).unwrap(), 0);
        assert_eq!(
            decode_sequence_cursor(&encode_sequence_cursor(u64::MAX)).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn rubbish_sequence_cursor_is_invalid_params() {
        let err = decode_sequence_cursor("not-a-number").unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
        let err = decode_sequence_cursor("-4").unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
    }
}
