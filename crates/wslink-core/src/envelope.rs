//! Envelope model — the decoded form of every logical wslink message.
//!
//! One envelope is a msgpack map tagged `"wslink": "1.0"` carrying
//! either a request, a result, or an error. This module owns the
//! conversions between [`Envelope`] and [`rmpv::Value`]; nothing else
//! in the workspace inspects envelope maps directly.

use rmpv::Value;

use crate::codec::{self, CodecError};

/// Protocol version stamped on every envelope.
pub const WSLINK_VERSION: &str = "1.0";

/// The system method that authenticates a connection.
pub const HELLO_METHOD: &str = "wslink.hello";

/// Correlation-id prefix marking protocol-internal requests.
pub const SYSTEM_ID_PREFIX: &str = "system:";

/// Correlation-id prefix for published events.
pub const PUBLISH_ID_PREFIX: &str = "publish:";

/// Wire error codes, from the JSON-RPC reserved range. Stable across
/// the wire; both ends know these numbers.
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const AUTHENTICATION_ERROR: i64 = -32000;
    pub const EXCEPTION_ERROR: i64 = -32001;
    pub const RESULT_SERIALIZE_ERROR: i64 = -32002;
    /// Reserved for the remote side's client library. Never emitted
    /// by this engine; carried for wire compatibility.
    pub const CLIENT_ERROR: i64 = -32099;
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// One logical message, after chunk reassembly and unpacking.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request {
        /// Opaque correlation token chosen by the caller. Ids starting
        /// with `"system:"` are protocol-internal.
        id: String,
        method: String,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    },
    Result {
        id: String,
        result: Value,
    },
    Error {
        id: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl Envelope {
    pub fn request(
        id: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Self {
        Envelope::Request {
            id: id.into(),
            method: method.into(),
            args,
            kwargs,
        }
    }

    pub fn result(id: impl Into<String>, result: Value) -> Self {
        Envelope::Result {
            id: id.into(),
            result,
        }
    }

    pub fn error(
        id: impl Into<String>,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Envelope::Error {
            id: id.into(),
            code,
            message: message.into(),
            data,
        }
    }

    /// The correlation id, common to all three kinds.
    pub fn id(&self) -> &str {
        match self {
            Envelope::Request { id, .. }
            | Envelope::Result { id, .. }
            | Envelope::Error { id, .. } => id,
        }
    }

    /// Whether this is a protocol-internal request.
    pub fn is_system(&self) -> bool {
        self.id().starts_with(SYSTEM_ID_PREFIX)
    }

    /// Build the wire map for this envelope.
    pub fn to_value(&self) -> Value {
        let mut entries = vec![(Value::from("wslink"), Value::from(WSLINK_VERSION))];
        match self {
            Envelope::Request {
                id,
                method,
                args,
                kwargs,
            } => {
                entries.push((Value::from("id"), Value::from(id.as_str())));
                entries.push((Value::from("method"), Value::from(method.as_str())));
                entries.push((Value::from("args"), Value::Array(args.clone())));
                entries.push((
                    Value::from("kwargs"),
                    Value::Map(
                        kwargs
                            .iter()
                            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                            .collect(),
                    ),
                ));
            }
            Envelope::Result { id, result } => {
                entries.push((Value::from("id"), Value::from(id.as_str())));
                entries.push((Value::from("result"), result.clone()));
            }
            Envelope::Error {
                id,
                code,
                message,
                data,
            } => {
                entries.push((Value::from("id"), Value::from(id.as_str())));
                let mut error = vec![
                    (Value::from("code"), Value::from(*code)),
                    (Value::from("message"), Value::from(message.as_str())),
                ];
                if let Some(data) = data {
                    error.push((Value::from("data"), data.clone()));
                }
                entries.push((Value::from("error"), Value::Map(error)));
            }
        }
        Value::Map(entries)
    }

    /// Interpret a decoded object graph as an envelope.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let Value::Map(entries) = value else {
            return Err(EnvelopeError::NotAMap);
        };

        let id = get(entries, "id")
            .ok_or(EnvelopeError::MissingField("id"))?
            .as_str()
            .ok_or(EnvelopeError::InvalidField("id"))?
            .to_owned();

        if let Some(method) = get(entries, "method") {
            let method = method
                .as_str()
                .ok_or(EnvelopeError::InvalidField("method"))?
                .to_owned();

            // Absent or mistyped args/kwargs degrade to empty, like the
            // reference implementation.
            let args = match get(entries, "args") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            let kwargs = match get(entries, "kwargs") {
                Some(Value::Map(pairs)) => pairs
                    .iter()
                    .filter_map(|(k, v)| k.as_str().map(|k| (k.to_owned(), v.clone())))
                    .collect(),
                _ => Vec::new(),
            };

            return Ok(Envelope::Request {
                id,
                method,
                args,
                kwargs,
            });
        }

        if let Some(result) = get(entries, "result") {
            return Ok(Envelope::Result {
                id,
                result: result.clone(),
            });
        }

        if let Some(error) = get(entries, "error") {
            let Value::Map(fields) = error else {
                return Err(EnvelopeError::InvalidField("error"));
            };
            let code = get(fields, "code")
                .and_then(Value::as_i64)
                .ok_or(EnvelopeError::InvalidField("error.code"))?;
            let message = get(fields, "message")
                .and_then(Value::as_str)
                .ok_or(EnvelopeError::InvalidField("error.message"))?
                .to_owned();
            let data = get(fields, "data").cloned();
            return Ok(Envelope::Error {
                id,
                code,
                message,
                data,
            });
        }

        Err(EnvelopeError::UnknownKind)
    }

    /// Pack this envelope for the wire.
    pub fn pack(&self) -> Result<Vec<u8>, CodecError> {
        codec::pack(&self.to_value())
    }

    /// Unpack one envelope from a complete byte buffer.
    pub fn unpack(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value = codec::unpack(bytes).map_err(EnvelopeError::Codec)?;
        Self::from_value(&value)
    }

    /// A copy safe to log: any `"secret"` entry in request arg maps is
    /// replaced with `*****`.
    pub fn redacted(&self) -> Envelope {
        let Envelope::Request {
            id,
            method,
            args,
            kwargs,
        } = self
        else {
            return self.clone();
        };

        let strip = |value: &Value| -> Value {
            if let Value::Map(pairs) = value {
                Value::Map(
                    pairs
                        .iter()
                        .map(|(k, v)| {
                            if k.as_str() == Some("secret") {
                                (k.clone(), Value::from("*****"))
                            } else {
                                (k.clone(), v.clone())
                            }
                        })
                        .collect(),
                )
            } else {
                value.clone()
            }
        };

        Envelope::Request {
            id: id.clone(),
            method: method.clone(),
            args: args.iter().map(strip).collect(),
            kwargs: kwargs.iter().map(|(k, v)| (k.clone(), strip(v))).collect(),
        }
    }
}

fn get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope is not a map")]
    NotAMap,

    #[error("envelope is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("envelope field '{0}' has the wrong type")]
    InvalidField(&'static str),

    #[error("envelope carries neither method, result, nor error")]
    UnknownKind,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
