//! Outbound JSON frames for the streaming protocol.
//!
//! Field names are camelCase matching the vendor wire format, so the structs
//! suppress the Rust naming lint (the same convention the subscribe types in
//! the REST SDK follow).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::constants::action;
use crate::error::Result;
use crate::types::enums::ExchangeSegment;

/// Monotonic counter feeding correlation ids.
static CORRELATION_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_correlation_id() -> String {
    format!("ss-{}", CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Authentication frame sent immediately after the socket opens.
#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct AuthRequest<'a> {
    correlationID: String,
    action: u8,
    params: AuthParams<'a>,
}

#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct AuthParams<'a> {
    clientCode: &'a str,
    authorization: &'a str,
}

/// Subscribe / unsubscribe / data-request frame.
#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct TokenRequest {
    correlationID: String,
    action: u8,
    params: TokenParams,
}

#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct TokenParams {
    mode: u8,
    tokenList: Vec<TokenGroup>,
}

/// Tokens grouped by exchange for one request.
#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct TokenGroup {
    exchangeType: u8,
    tokens: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Compose the auth frame: `{correlationID, action:1, params:{clientCode,
/// authorization}}`.
pub fn auth_frame(client_code: &str, jwt: &str) -> Result<String> {
    let req = AuthRequest {
        correlationID: next_correlation_id(),
        action: action::SUBSCRIBE,
        params: AuthParams {
            clientCode: client_code,
            authorization: jwt,
        },
    };
    Ok(serde_json::to_string(&req)?)
}

/// Compose a subscribe / unsubscribe / data-request frame for the given
/// mode and token groups.
pub fn token_frame<I>(action: u8, mode: u8, groups: I) -> Result<String>
where
    I: IntoIterator<Item = (ExchangeSegment, Vec<u32>)>,
{
    let token_list = groups
        .into_iter()
        .filter(|(_, tokens)| !tokens.is_empty())
        .map(|(exchange, tokens)| TokenGroup {
            exchangeType: exchange.wire_code(),
            tokens,
        })
        .collect();
    let req = TokenRequest {
        correlationID: next_correlation_id(),
        action,
        params: TokenParams {
            mode,
            tokenList: token_list,
        },
    };
    Ok(serde_json::to_string(&req)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn auth_frame_shape() {
        let frame = auth_frame("A123", "jwt-token").unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["action"], 1);
        assert_eq!(v["params"]["clientCode"], "A123");
        assert_eq!(v["params"]["authorization"], "jwt-token");
        assert!(v["correlationID"].as_str().unwrap().starts_with("ss-"));
    }

    #[test]
    fn token_frame_groups_by_exchange() {
        let frame = token_frame(
            1,
            3,
            vec![
                (ExchangeSegment::NSE_CM, vec![101, 303]),
                (ExchangeSegment::NSE_FO, vec![202]),
            ],
        )
        .unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["action"], 1);
        assert_eq!(v["params"]["mode"], 3);
        let list = v["params"]["tokenList"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["exchangeType"], 1);
        assert_eq!(list[0]["tokens"], serde_json::json!([101, 303]));
        assert_eq!(list[1]["exchangeType"], 2);
    }

    #[test]
    fn empty_groups_are_omitted() {
        let frame = token_frame(0, 1, vec![(ExchangeSegment::NSE_CM, vec![])]).unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["params"]["tokenList"].as_array().unwrap().len(), 0);
    }
}
