use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Known provider error signatures.
///
/// These come from vendor error wording and can change without notice; the
/// list is a seed, extend it when a new provider message shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSignature {
    /// SigV4-style upstream rejecting a bearer token
    InvalidKeyValuePair,
    /// OpenAI-compatible upstream rejecting the key itself
    InvalidApiKey,
    MalformedAuthorizationHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// Matched on an error code field of a JSON body
    Structured,
    /// Matched by pattern on message text
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureMatch {
    pub signature: ErrorSignature,
    /// The exact text that matched, kept for later verification
    pub literal: String,
    pub source: MatchSource,
}

static INVALID_KEY_VALUE_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)invalid key=value pair").expect("valid regex"));
static INVALID_API_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(incorrect|invalid) api key( provided)?").expect("valid regex"));
static MALFORMED_AUTHORIZATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)authorization header (is )?(malformed|invalid)").expect("valid regex")
});

/// JSON fields that carry machine-readable error codes
const CODE_POINTERS: &[&str] = &["/error/code", "/error/type", "/code", "/type", "/__type"];
/// JSON fields that carry human-readable messages
const MESSAGE_POINTERS: &[&str] = &[
    "/error/message",
    "/message",
    "/Message",
    "/error_msg",
    "/error",
];

impl ErrorSignature {
    pub const ALL: [ErrorSignature; 3] = [
        ErrorSignature::InvalidKeyValuePair,
        ErrorSignature::InvalidApiKey,
        ErrorSignature::MalformedAuthorizationHeader,
    ];

    fn codes(&self) -> &'static [&'static str] {
        match self {
            ErrorSignature::InvalidKeyValuePair => &["IncompleteSignatureException"],
            ErrorSignature::InvalidApiKey => &["invalid_api_key"],
            ErrorSignature::MalformedAuthorizationHeader => &["invalid_authorization_header"],
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            ErrorSignature::InvalidKeyValuePair => &INVALID_KEY_VALUE_PAIR,
            ErrorSignature::InvalidApiKey => &INVALID_API_KEY,
            ErrorSignature::MalformedAuthorizationHeader => &MALFORMED_AUTHORIZATION,
        }
    }

    /// Match a response body: structured error codes first, then message text,
    /// then the raw body for opaque upstream output
    pub fn detect(body: &str) -> Option<SignatureMatch> {
        let json: Option<Value> = serde_json::from_str(body).ok();

        if let Some(json) = &json {
            for pointer in CODE_POINTERS {
                let Some(code) = json.pointer(pointer).and_then(Value::as_str) else {
                    continue;
                };
                for signature in Self::ALL {
                    if signature.codes().iter().any(|c| c.eq_ignore_ascii_case(code)) {
                        return Some(SignatureMatch {
                            signature,
                            literal: code.to_string(),
                            source: MatchSource::Structured,
                        });
                    }
                }
            }

            for pointer in MESSAGE_POINTERS {
                if let Some(message) = json.pointer(pointer).and_then(Value::as_str) {
                    if let Some(found) = Self::match_text(message) {
                        return Some(found);
                    }
                }
            }
        }

        Self::match_text(body)
    }

    fn match_text(text: &str) -> Option<SignatureMatch> {
        Self::ALL.into_iter().find_map(|signature| {
            signature.pattern().find(text).map(|m| SignatureMatch {
                signature,
                literal: m.as_str().to_string(),
                source: MatchSource::Text,
            })
        })
    }
}
