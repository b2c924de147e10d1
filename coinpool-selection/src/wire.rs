//! JSON request/response envelopes exchanged with flows.
//!
//! Amounts travel as base-10 strings, claim ids as UUID strings. Converting a
//! `WireEvent` into a `TokenEvent` validates both, and compiles the tag
//! pattern.

use coinpool_core::{
    BalanceQuery, CachedToken, ClaimId, ClaimQuery, ClaimRelease, CoinPoolError, LedgerChange,
    StateRef, TokenAmount, TokenEvent, TokenFilter, TokenPoolKey, TokenResponse, ValidationError,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    pub event: WireEvent,
}

impl WireRequest {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn pool_key(&self) -> &TokenPoolKey {
        self.event.pool_key()
    }

    /// Validate into an internal event. ClaimQuery takes its request id from
    /// the envelope so redelivery is recognised.
    pub fn to_event(&self) -> Result<TokenEvent, ValidationError> {
        self.event.to_event(&self.request_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WireEvent {
    ClaimQuery {
        pool_key: TokenPoolKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag_regex: Option<String>,
        target_amount: String,
    },
    ClaimRelease {
        pool_key: TokenPoolKey,
        claim_id: String,
    },
    LedgerChange {
        pool_key: TokenPoolKey,
        #[serde(default)]
        produced: Vec<WireToken>,
        #[serde(default)]
        consumed: Vec<StateRef>,
    },
    BalanceQuery {
        pool_key: TokenPoolKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag_regex: Option<String>,
    },
}

impl WireEvent {
    pub fn pool_key(&self) -> &TokenPoolKey {
        match self {
            WireEvent::ClaimQuery { pool_key, .. }
            | WireEvent::ClaimRelease { pool_key, .. }
            | WireEvent::LedgerChange { pool_key, .. }
            | WireEvent::BalanceQuery { pool_key, .. } => pool_key,
        }
    }

    pub fn to_event(&self, request_id: &str) -> Result<TokenEvent, ValidationError> {
        let event = match self {
            WireEvent::ClaimQuery {
                pool_key,
                owner_hash,
                tag_regex,
                target_amount,
            } => {
                let target_amount: TokenAmount = target_amount.parse()?;
                if target_amount.is_zero() {
                    return Err(ValidationError::InvalidAmount {
                        value: target_amount.to_string(),
                        reason: "target amount must be positive".to_string(),
                    });
                }
                TokenEvent::ClaimQuery(ClaimQuery {
                    request_id: request_id.to_string(),
                    pool_key: pool_key.clone(),
                    filter: TokenFilter::new(owner_hash.clone(), tag_regex.as_deref())?,
                    target_amount,
                })
            }
            WireEvent::ClaimRelease { pool_key, claim_id } => {
                TokenEvent::ClaimRelease(ClaimRelease {
                    pool_key: pool_key.clone(),
                    claim_id: claim_id.parse::<ClaimId>()?,
                })
            }
            WireEvent::LedgerChange {
                pool_key,
                produced,
                consumed,
            } => TokenEvent::LedgerChange(LedgerChange {
                pool_key: pool_key.clone(),
                produced: produced
                    .iter()
                    .map(WireToken::to_cached)
                    .collect::<Result<_, _>>()?,
                consumed: consumed.clone(),
            }),
            WireEvent::BalanceQuery {
                pool_key,
                owner_hash,
                tag_regex,
            } => TokenEvent::BalanceQuery(BalanceQuery {
                pool_key: pool_key.clone(),
                filter: TokenFilter::new(owner_hash.clone(), tag_regex.as_deref())?,
            }),
        };
        Ok(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireToken {
    pub state_ref: StateRef,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl WireToken {
    pub fn to_cached(&self) -> Result<CachedToken, ValidationError> {
        Ok(CachedToken {
            state_ref: self.state_ref.clone(),
            amount: self.amount.parse()?,
            owner_hash: self.owner_hash.clone(),
            tag: self.tag.clone(),
        })
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    pub payload: WirePayload,
}

impl WireResponse {
    pub fn new(request: &WireRequest, payload: WirePayload) -> Self {
        Self {
            request_id: request.request_id.clone(),
            flow_id: request.flow_id.clone(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePayload {
    Response(TokenResponse),
    Error { error: WireError },
}

/// Whether resubmitting the same request can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Transient,
    Platform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub error_type: String,
    pub message: String,
}

impl WireError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            error_type: "ClaimStateConflict".to_string(),
            message: message.into(),
        }
    }

    pub fn platform(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Platform,
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

impl From<&CoinPoolError> for WireError {
    fn from(err: &CoinPoolError) -> Self {
        Self::platform(err.kind(), err.to_string())
    }
}

/// What the transport should do with a processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOutcome {
    Reply(WireResponse),
    /// Processed; the event has no response (LedgerChange).
    NoReply,
    /// Will never succeed on redelivery. `response` is set when the request
    /// decoded far enough to address a reply.
    DeadLetter {
        reason: String,
        response: Option<WireResponse>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> TokenPoolKey {
        TokenPoolKey::new("alice", "cash", "issuer-1", "USD")
    }

    fn claim_query(target: &str, tag_regex: Option<&str>) -> WireRequest {
        WireRequest {
            request_id: "req-1".to_string(),
            flow_id: Some("flow-9".to_string()),
            event: WireEvent::ClaimQuery {
                pool_key: key(),
                owner_hash: None,
                tag_regex: tag_regex.map(str::to_string),
                target_amount: target.to_string(),
            },
        }
    }

    #[test]
    fn test_decode_claim_query() {
        let raw = json!({
            "request_id": "req-1",
            "event": {
                "kind": "ClaimQuery",
                "pool_key": {
                    "holder_id": "alice",
                    "token_type": "cash",
                    "issuer_hash": "issuer-1",
                    "symbol": "USD"
                },
                "target_amount": "340282366920938463463374607431768211457"
            }
        });
        let request = WireRequest::decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(request.pool_key(), &key());
        assert!(request.flow_id.is_none());

        match request.to_event().unwrap() {
            TokenEvent::ClaimQuery(q) => {
                assert_eq!(q.request_id, "req-1");
                assert!(q.filter.is_unfiltered());
                assert_eq!(
                    q.target_amount.to_string(),
                    "340282366920938463463374607431768211457"
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_bad_amounts_and_patterns_are_rejected() {
        for target in ["-5", "1.5", "", "0"] {
            let err = claim_query(target, None).to_event().unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidAmount { .. }),
                "target {:?} gave {:?}",
                target,
                err
            );
        }
        let err = claim_query("5", Some("(")).to_event().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTagRegex { .. }));
    }

    #[test]
    fn test_bad_claim_id_is_rejected() {
        let request = WireRequest {
            request_id: "req-2".to_string(),
            flow_id: None,
            event: WireEvent::ClaimRelease {
                pool_key: key(),
                claim_id: "not-a-uuid".to_string(),
            },
        };
        assert!(matches!(
            request.to_event().unwrap_err(),
            ValidationError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_ledger_change_tokens_convert() {
        let event = WireEvent::LedgerChange {
            pool_key: key(),
            produced: vec![WireToken {
                state_ref: "tx-5:1".into(),
                amount: "42".to_string(),
                owner_hash: Some("owner-a".to_string()),
                tag: None,
            }],
            consumed: vec!["tx-1:0".into()],
        };
        match event.to_event("req-3").unwrap() {
            TokenEvent::LedgerChange(change) => {
                assert_eq!(
                    change.produced,
                    vec![CachedToken::new("tx-5:1", 42).with_owner("owner-a")]
                );
                assert_eq!(change.consumed, vec![StateRef::from("tx-1:0")]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_error_payload_shape() {
        let request = claim_query("5", None);
        let response = WireResponse::new(
            &request,
            WirePayload::Error {
                error: WireError::transient("claim state moved, retry"),
            },
        );
        let value: serde_json::Value =
            serde_json::from_slice(&response.encode().unwrap()).unwrap();
        assert_eq!(value["request_id"], "req-1");
        assert_eq!(value["flow_id"], "flow-9");
        assert_eq!(value["payload"]["error"]["kind"], "Transient");

        let decoded: WireResponse = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_response_payload_is_kind_tagged() {
        let payload = WirePayload::Response(TokenResponse::BalanceQueryResponse(
            coinpool_core::BalanceQueryResponse {
                pool_key: key(),
                available_balance: TokenAmount::from(3),
                total_balance: TokenAmount::from(8),
            },
        ));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "BalanceQueryResponse");
        assert_eq!(value["available_balance"], "3");
    }
}
