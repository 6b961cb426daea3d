//! Ref extraction from provider-agnostic JSON webhook payloads (C2).

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

const ZERO_COMMIT: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRef {
    pub ref_type: RefType,
    pub ref_name: String,
    pub after: Option<String>,
    pub deletion: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnparseableRef(pub String);

impl std::fmt::Display for UnparseableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparseable ref: {}", self.0)
    }
}

impl std::error::Error for UnparseableRef {}

#[derive(Debug, Deserialize)]
struct RefPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    after: Option<String>,
}

fn heads_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^refs/heads/(.+)$").unwrap())
}

fn tags_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^refs/tags/(.+)$").unwrap())
}

/// Extract `(refType, refName, after, deletion)` from a parsed JSON body.
///
/// `ref` is matched against `refs/heads/<name>` and `refs/tags/<name>`
/// first; failing that, the ref is split on `/` and treated as
/// `<remote>/heads|tags/<name...>`. Anything else is `UnparseableRef`.
pub fn parse(body: &serde_json::Value) -> Result<ParsedRef, UnparseableRef> {
    let payload: RefPayload =
        serde_json::from_value(body.clone()).map_err(|_| UnparseableRef("not an object".into()))?;

    let git_ref = payload
        .git_ref
        .ok_or_else(|| UnparseableRef("missing ref field".into()))?;

    let (ref_type, ref_name) = if let Some(caps) = heads_re().captures(&git_ref) {
        (RefType::Branch, caps[1].to_string())
    } else if let Some(caps) = tags_re().captures(&git_ref) {
        (RefType::Tag, caps[1].to_string())
    } else {
        let parts: Vec<&str> = git_ref.splitn(3, '/').collect();
        match parts.as_slice() {
            [_, "heads", rest] => (RefType::Branch, rest.to_string()),
            [_, "tags", rest] => (RefType::Tag, rest.to_string()),
            _ => return Err(UnparseableRef(git_ref)),
        }
    };

    let deletion = payload.after.as_deref() == Some(ZERO_COMMIT);

    Ok(ParsedRef {
        ref_type,
        ref_name,
        after: payload.after,
        deletion,
    })
}
