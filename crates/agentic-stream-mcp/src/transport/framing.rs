//! Message framing for newline-delimited JSON.

use agentic_stream::{decode_payload, encode, encode_reply, CodecError, Message, Payload};

/// Parse one line as a single message or a batch.
pub fn parse_line(line: &str) -> Result<Payload, CodecError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CodecError::Parse("Empty message".to_string()));
    }
    decode_payload(trimmed.as_bytes())
}

/// Serialize one message as a JSON line (with trailing newline).
pub fn frame_message(message: &Message) -> Vec<u8> {
    let mut line = encode(message);
    line.push(b'\n');
    line
}

/// Serialize the replies to one input line, as an array iff the input was a batch.
pub fn frame_reply(replies: &[Message], batch: bool) -> Vec<u8> {
    let mut line = encode_reply(replies, batch);
    line.push(b'\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentic_stream::RequestId;
    use serde_json::json;

    #[test]
    fn test_empty_line_is_parse_error() {
        let err = tokio_test::assert_err!(parse_line("   "));
        assert!(matches!(err, CodecError::Parse(_)));
    }

    #[test]
    fn test_batch_line() {
        let payload = tokio_test::assert_ok!(parse_line(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"log"}]"#
        ));
        assert!(payload.is_batch());
        assert_eq!(payload.messages().len(), 2);
    }

    #[test]
    fn test_frames_end_with_newline() {
        let reply = Message::response(RequestId::Number(1), json!("pong"));
        let single = frame_message(&reply);
        assert_eq!(single.last(), Some(&b'\n'));
        assert_eq!(single.iter().filter(|b| **b == b'\n').count(), 1);

        let batch = frame_reply(&[reply], true);
        assert!(batch.starts_with(b"["));
    }
}
