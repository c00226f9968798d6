//! Bytes <-> [`Message`] conversion with strict structural validation.

use serde_json::Value;

use crate::message::{
    error_codes, ErrorObject, ErrorResponse, Message, Notification, Request, RequestId, Response,
    JSONRPC_VERSION,
};

/// Decoding failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The body is not JSON at all.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Valid JSON that is not a valid message. `id` is recovered from the offending element when possible.
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        id: Option<RequestId>,
        reason: String,
    },
}

impl CodecError {
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            CodecError::Parse(_) => None,
            CodecError::InvalidMessage { id, .. } => id.as_ref(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            CodecError::Parse(_) => error_codes::PARSE_ERROR,
            CodecError::InvalidMessage { .. } => error_codes::INVALID_REQUEST,
        }
    }

    /// The error response a transport should send back for this failure.
    pub fn to_message(&self) -> Message {
        Message::error(self.id().cloned(), self.code(), self.to_string(), None)
    }

    fn invalid(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        CodecError::InvalidMessage {
            id,
            reason: reason.into(),
        }
    }
}

/// A decoded body, remembering whether it arrived as a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Message),
    Batch(Vec<Message>),
}

impl Payload {
    pub fn is_batch(&self) -> bool {
        matches!(self, Payload::Batch(_))
    }

    pub fn messages(&self) -> &[Message] {
        match self {
            Payload::Single(m) => std::slice::from_ref(m),
            Payload::Batch(ms) => ms,
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Payload::Single(m) => vec![m],
            Payload::Batch(ms) => ms,
        }
    }
}

/// Decode a single object or a non-empty batch.
pub fn decode(bytes: &[u8]) -> Result<Vec<Message>, CodecError> {
    decode_payload(bytes).map(Payload::into_messages)
}

/// Like [`decode`], but keeps the single/batch distinction for reply shaping.
pub fn decode_payload(bytes: &[u8]) -> Result<Payload, CodecError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| CodecError::Parse(e.to_string()))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(CodecError::invalid(None, "Batch must not be empty"));
            }
            let messages = items
                .iter()
                .map(message_from_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Payload::Batch(messages))
        }
        other => message_from_value(&other).map(Payload::Single),
    }
}

pub fn encode(message: &Message) -> Vec<u8> {
    message.to_value().to_string().into_bytes()
}

pub fn encode_batch(messages: &[Message]) -> Vec<u8> {
    Value::Array(messages.iter().map(Message::to_value).collect())
        .to_string()
        .into_bytes()
}

/// Encode a reply set shaped like the input: an array iff the input was a batch.
pub fn encode_reply(messages: &[Message], batch: bool) -> Vec<u8> {
    match (batch, messages) {
        (false, [single]) => encode(single),
        _ => encode_batch(messages),
    }
}

/// Validate one JSON element and build the corresponding [`Message`].
pub fn message_from_value(value: &Value) -> Result<Message, CodecError> {
    let obj = value
        .as_object()
        .ok_or_else(|| CodecError::invalid(None, "Message must be a JSON object"))?;

    let raw_id = obj.get("id");
    let recovered = raw_id.and_then(RequestId::from_value);

    if let Some(version) = obj.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Err(CodecError::invalid(
                recovered,
                format!("Expected jsonrpc version \"{JSONRPC_VERSION}\", got {version}"),
            ));
        }
    }

    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");

    if let Some(method) = obj.get("method") {
        if has_result || has_error {
            return Err(CodecError::invalid(
                recovered,
                "Message cannot carry both a method and a result or error",
            ));
        }
        let method = method
            .as_str()
            .ok_or_else(|| CodecError::invalid(recovered.clone(), "Method must be a string"))?;
        if method.is_empty() {
            return Err(CodecError::invalid(recovered, "Method name must not be empty"));
        }
        let params = parse_params(obj.get("params"), &recovered)?;

        return match raw_id {
            None => Ok(Message::Notification(Notification {
                method: method.to_string(),
                params,
            })),
            Some(raw) => {
                let id = RequestId::from_value(raw).ok_or_else(|| {
                    CodecError::invalid(None, "Request id must be a string or an integer")
                })?;
                Ok(Message::Request(Request {
                    id,
                    method: method.to_string(),
                    params,
                }))
            }
        };
    }

    match (has_result, has_error) {
        (true, true) => Err(CodecError::invalid(
            recovered,
            "Response must carry exactly one of result or error",
        )),
        (true, false) => {
            let id = match raw_id {
                Some(raw) => RequestId::from_value(raw).ok_or_else(|| {
                    CodecError::invalid(None, "Response id must be a string or an integer")
                })?,
                None => return Err(CodecError::invalid(None, "Response is missing an id")),
            };
            Ok(Message::Response(Response {
                id,
                result: obj.get("result").cloned().unwrap_or(Value::Null),
            }))
        }
        (false, true) => {
            let id = match raw_id {
                None | Some(Value::Null) => None,
                Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
                    CodecError::invalid(None, "Error response id must be a string, an integer or null")
                })?),
            };
            let error = parse_error_object(obj.get("error"), &id)?;
            Ok(Message::Error(ErrorResponse { id, error }))
        }
        (false, false) => Err(CodecError::invalid(
            recovered,
            "Message must carry a method, a result or an error",
        )),
    }
}

fn parse_params(raw: Option<&Value>, id: &Option<RequestId>) -> Result<Option<Value>, CodecError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(v @ (Value::Object(_) | Value::Array(_))) => Ok(Some(v.clone())),
        Some(_) => Err(CodecError::invalid(
            id.clone(),
            "Params must be an object or an array",
        )),
    }
}

fn parse_error_object(raw: Option<&Value>, id: &Option<RequestId>) -> Result<ErrorObject, CodecError> {
    let obj = raw
        .and_then(Value::as_object)
        .ok_or_else(|| CodecError::invalid(id.clone(), "Error must be an object"))?;
    let code = obj
        .get("code")
        .and_then(Value::as_i64)
        .and_then(|c| i32::try_from(c).ok())
        .ok_or_else(|| CodecError::invalid(id.clone(), "Error code must be an integer"))?;
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::invalid(id.clone(), "Error message must be a string"))?;
    Ok(ErrorObject {
        code,
        message: message.to_string(),
        data: obj.get("data").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_value(value: Value) -> Result<Vec<Message>, CodecError> {
        decode(value.to_string().as_bytes())
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = decode(br#"{"method":}"#).unwrap_err();
        assert!(matches!(err, CodecError::Parse(_)));
        assert_eq!(err.code(), error_codes::PARSE_ERROR);
        assert_eq!(err.id(), None);
    }

    #[test]
    fn test_empty_batch_is_invalid() {
        let err = decode(b"[]").unwrap_err();
        assert!(matches!(err, CodecError::InvalidMessage { id: None, .. }));
    }

    #[test]
    fn test_request_and_notification_distinguished_by_id() {
        let msgs = decode_value(json!([
            {"jsonrpc": "2.0", "id": 1, "method": "ping"},
            {"jsonrpc": "2.0", "method": "log"}
        ]))
        .unwrap();
        assert!(matches!(&msgs[0], Message::Request(r) if r.id == RequestId::Number(1)));
        assert!(matches!(&msgs[1], Message::Notification(n) if n.method == "log"));
    }

    #[test]
    fn test_missing_jsonrpc_tag_is_accepted() {
        let msgs = decode_value(json!({"id": "a", "method": "ping"})).unwrap();
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_wrong_version_keeps_id() {
        let err = decode_value(json!({"jsonrpc": "1.0", "id": 9, "method": "ping"})).unwrap_err();
        assert_eq!(err.id(), Some(&RequestId::Number(9)));
    }

    #[test]
    fn test_result_and_error_together_rejected() {
        let err = decode_value(json!({
            "jsonrpc": "2.0", "id": 3, "result": 1, "error": {"code": 1, "message": "x"}
        }))
        .unwrap_err();
        assert_eq!(err.id(), Some(&RequestId::Number(3)));
    }

    #[test]
    fn test_method_with_result_rejected() {
        assert!(decode_value(json!({"id": 1, "method": "a", "result": {}})).is_err());
    }

    #[test]
    fn test_float_id_rejected_without_recovery() {
        let err = decode_value(json!({"id": 1.5, "method": "ping"})).unwrap_err();
        assert_eq!(err.id(), None);
    }

    #[test]
    fn test_id_outside_i64_range_rejected() {
        let err = decode_value(json!({"id": u64::MAX, "method": "ping"})).unwrap_err();
        assert!(matches!(err, CodecError::InvalidMessage { id: None, .. }));
        assert!(decode_value(json!({"id": i64::MAX, "method": "ping"})).is_ok());
    }

    #[test]
    fn test_scalar_params_rejected() {
        assert!(decode_value(json!({"id": 1, "method": "a", "params": 3})).is_err());
        assert!(decode_value(json!({"id": 1, "method": "a", "params": null})).is_ok());
    }

    #[test]
    fn test_error_response_with_null_id() {
        let msgs = decode_value(json!({
            "jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "bad", "data": [1]}
        }))
        .unwrap();
        match &msgs[0] {
            Message::Error(e) => {
                assert_eq!(e.id, None);
                assert_eq!(e.error.data, Some(json!([1])));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_without_id_rejected() {
        assert!(decode_value(json!({"jsonrpc": "2.0", "result": 1})).is_err());
    }

    #[test]
    fn test_round_trip_preserves_id_types() {
        let originals = vec![
            Message::request(42i64, "a", Some(json!({"k": [1, 2]}))),
            Message::request("42", "a", None),
            Message::response(RequestId::Number(i64::MAX), json!("pong")),
            Message::error(Some(RequestId::String("x".into())), -32601, "nope", Some(json!({"d": 1}))),
            Message::notification("n", Some(json!([true]))),
        ];
        let bytes = encode_batch(&originals);
        assert_eq!(decode(&bytes).unwrap(), originals);

        let text = String::from_utf8(encode(&originals[0])).unwrap();
        assert!(text.contains("\"id\":42"));
        assert!(!text.contains("42.0"));
        let text = String::from_utf8(encode(&originals[1])).unwrap();
        assert!(text.contains("\"id\":\"42\""));
    }

    #[test]
    fn test_encode_reply_shape() {
        let reply = vec![Message::response(RequestId::Number(1), json!("pong"))];
        let single: Value = serde_json::from_slice(&encode_reply(&reply, false)).unwrap();
        assert!(single.is_object());
        let batch: Value = serde_json::from_slice(&encode_reply(&reply, true)).unwrap();
        assert!(batch.is_array());
    }

    #[test]
    fn test_payload_remembers_batch() {
        let single = decode_payload(br#"{"id":1,"method":"a"}"#).unwrap();
        assert!(!single.is_batch());
        let batch = decode_payload(br#"[{"id":1,"method":"a"}]"#).unwrap();
        assert!(batch.is_batch());
        assert_eq!(batch.messages().len(), 1);
    }
}
