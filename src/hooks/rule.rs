//! Trigger rule algebra: `match`, `and`, `or`, `not` over a parsed request.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::hooks::executor::RequestView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchSource {
    Header,
    Query,
    PayloadJsonPath,
    PayloadForm,
    RawBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum MatchOp {
    Equals { value: String },
    RegexMatches { pattern: String },
    IpInCidr { cidr: String },
    HmacSha1 { secret: String },
    HmacSha256 { secret: String },
}

/// A tree of trigger conditions. Internally tagged so hook definition files
/// round-trip byte-for-byte-equivalent JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerRule {
    Match {
        source: MatchSource,
        name: Option<String>,
        #[serde(flatten)]
        op: MatchOp,
    },
    And(Vec<TriggerRule>),
    Or(Vec<TriggerRule>),
    Not(Box<TriggerRule>),
}

impl TriggerRule {
    /// Evaluate with short-circuiting for `and`/`or`.
    pub fn evaluate(&self, request: &RequestView) -> bool {
        match self {
            TriggerRule::Match { source, name, op } => {
                evaluate_match(*source, name.as_deref(), op, request)
            }
            TriggerRule::And(rules) => rules.iter().all(|r| r.evaluate(request)),
            TriggerRule::Or(rules) => rules.iter().any(|r| r.evaluate(request)),
            TriggerRule::Not(inner) => !inner.evaluate(request),
        }
    }
}

fn evaluate_match(source: MatchSource, name: Option<&str>, op: &MatchOp, request: &RequestView) -> bool {
    let subject = match resolve_subject(source, name, request) {
        Some(s) => s,
        None => return false,
    };

    match op {
        MatchOp::Equals { value } => subject == *value,
        MatchOp::RegexMatches { pattern } => Regex::new(pattern)
            .map(|re| re.is_match(&subject))
            .unwrap_or(false),
        MatchOp::IpInCidr { cidr } => ip_in_cidr(&subject, cidr),
        MatchOp::HmacSha1 { secret } => verify_hmac_sha1(secret, &subject, request.raw_body),
        MatchOp::HmacSha256 { secret } => verify_hmac_sha256(secret, &subject, request.raw_body),
    }
}

fn resolve_subject(source: MatchSource, name: Option<&str>, request: &RequestView) -> Option<String> {
    match source {
        MatchSource::Header => name.and_then(|n| request.header(n)).map(str::to_string),
        MatchSource::Query => name.and_then(|n| request.query(n)).map(str::to_string),
        MatchSource::PayloadJsonPath => {
            let path = name?;
            let json = request.parsed_json?;
            json_path_lookup(json, path).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
        MatchSource::PayloadForm => name.and_then(|n| request.form(n)).map(str::to_string),
        MatchSource::RawBody => Some(String::from_utf8_lossy(request.raw_body).into_owned()),
    }
}

/// Minimal dotted-path lookup: `a.b.c` walks nested objects. No array indexing.
fn json_path_lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Hand-rolled CIDR matching over `std::net::IpAddr` — there is no CIDR
/// crate anywhere in this codebase's dependency graph.
fn ip_in_cidr(ip_str: &str, cidr: &str) -> bool {
    let Ok(ip) = ip_str.parse::<IpAddr>() else {
        return false;
    };

    let Some((net_str, prefix_str)) = cidr.split_once('/') else {
        return ip_str == cidr;
    };

    let Ok(net) = net_str.parse::<IpAddr>() else {
        return false;
    };
    let Ok(prefix_len) = prefix_str.parse::<u32>() else {
        return false;
    };

    match (ip, net) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            if prefix_len > 32 {
                return false;
            }
            let mask = if prefix_len == 0 { 0 } else { !0u32 << (32 - prefix_len) };
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            if prefix_len > 128 {
                return false;
            }
            let mask = if prefix_len == 0 {
                0u128
            } else {
                !0u128 << (128 - prefix_len)
            };
            (u128::from(ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

fn verify_hmac_sha1(secret: &str, hex_sig: &str, body: &[u8]) -> bool {
    use hmac::{Hmac, Mac};
    use sha1::Sha1;

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn verify_hmac_sha256(secret: &str, hex_sig: &str, body: &[u8]) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_request(raw_body: &[u8]) -> RequestView<'_> {
        RequestView {
            headers: HashMap::new(),
            query: HashMap::new(),
            form: HashMap::new(),
            parsed_json: None,
            raw_body,
        }
    }

    #[test]
    fn ipv4_cidr_matches_inside_range() {
        assert!(ip_in_cidr("192.168.1.42", "192.168.1.0/24"));
        assert!(!ip_in_cidr("192.168.2.42", "192.168.1.0/24"));
    }

    #[test]
    fn ipv4_exact_slash_thirty_two() {
        assert!(ip_in_cidr("10.0.0.1", "10.0.0.1/32"));
        assert!(!ip_in_cidr("10.0.0.2", "10.0.0.1/32"));
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let rule = TriggerRule::And(vec![
            TriggerRule::Match {
                source: MatchSource::Header,
                name: Some("X-Test".into()),
                op: MatchOp::Equals { value: "no-such-header-value".into() },
            },
        ]);
        assert!(!rule.evaluate(&empty_request(b"")));
    }

    #[test]
    fn not_inverts_inner_result() {
        let always_false = TriggerRule::Match {
            source: MatchSource::Header,
            name: Some("X-Missing".into()),
            op: MatchOp::Equals { value: "x".into() },
        };
        let rule = TriggerRule::Not(Box::new(always_false));
        assert!(rule.evaluate(&empty_request(b"")));
    }

    #[test]
    fn or_matches_if_any_branch_matches() {
        let mut headers = HashMap::new();
        headers.insert("X-Test".to_string(), "hello".to_string());
        let request = RequestView {
            headers,
            query: HashMap::new(),
            form: HashMap::new(),
            parsed_json: None,
            raw_body: b"",
        };

        let rule = TriggerRule::Or(vec![
            TriggerRule::Match {
                source: MatchSource::Header,
                name: Some("X-Test".into()),
                op: MatchOp::Equals { value: "nope".into() },
            },
            TriggerRule::Match {
                source: MatchSource::Header,
                name: Some("X-Test".into()),
                op: MatchOp::Equals { value: "hello".into() },
            },
        ]);
        assert!(rule.evaluate(&request));
    }

    #[test]
    fn json_path_lookup_walks_nested_objects() {
        let value = serde_json::json!({"a": {"b": {"c": "deep"}}});
        assert_eq!(
            json_path_lookup(&value, "a.b.c").and_then(|v| v.as_str()),
            Some("deep")
        );
        assert!(json_path_lookup(&value, "a.b.missing").is_none());
    }
}
