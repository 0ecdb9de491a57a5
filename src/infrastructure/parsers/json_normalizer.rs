//! JSON feeds, such as catalog exports wrapped in an `IsOK`/`Results`
//! envelope. JSON already has the normalized shape, so parsing is all that is
//! left, apart from unwrapping the envelope.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::{error::ParseError, models::NormalizedDocument};

const STATUS_KEY: &str = "IsOK";
const RESULTS_KEY: &str = "Results";

pub fn normalize_slice(bytes: &[u8]) -> Result<NormalizedDocument, ParseError> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|e| {
        if e.is_eof() && bytes.iter().all(u8::is_ascii_whitespace) {
            ParseError::Empty
        } else {
            ParseError::Malformed(e.to_string())
        }
    })?;
    unwrap_envelope(doc)
}

/// `{IsOK, Results, ..}` becomes `{Results}`, so the results node is the
/// document's single root. Documents without the envelope pass through.
fn unwrap_envelope(doc: Value) -> Result<NormalizedDocument, ParseError> {
    let Value::Object(mut map) = doc else {
        return Ok(doc);
    };
    let Some(status) = map.get(STATUS_KEY) else {
        return Ok(Value::Object(map));
    };
    if !is_truthy(status) {
        warn!("Feed envelope reports {}={}", STATUS_KEY, status);
        return Err(ParseError::Rejected(format!("{} is {}", STATUS_KEY, status)));
    }
    match map.remove(RESULTS_KEY) {
        Some(results) if !results.is_null() => {
            debug!("Unwrapped {} envelope", STATUS_KEY);
            let mut root = Map::new();
            root.insert(RESULTS_KEY.to_string(), results);
            Ok(Value::Object(root))
        }
        _ => Err(ParseError::Rejected(format!("{} envelope without {}", STATUS_KEY, RESULTS_KEY))),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
