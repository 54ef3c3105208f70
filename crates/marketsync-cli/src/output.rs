use std::fmt::{Display, Formatter};
use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::commands::CommandResult;
use crate::error::CliError;

/// Request identifier (UUID v4) echoed in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeMeta {
    pub request_id: RequestId,
    pub source: String,
    pub latency_ms: u64,
    pub warnings: Vec<String>,
}

/// Stdout document for every command.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub data: Value,
}

impl Envelope {
    pub fn from_result(request_id: RequestId, result: CommandResult) -> Self {
        Self {
            meta: EnvelopeMeta {
                request_id,
                source: result.source,
                latency_ms: result.latency_ms,
                warnings: result.warnings,
            },
            data: result.data,
        }
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    write_envelope(&mut stdout.lock(), envelope, pretty)
}

fn write_envelope(writer: &mut impl Write, envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    writeln!(writer, "{payload}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compact_envelope_is_one_json_line() {
        let result = CommandResult::ok(json!({"bars": []}), "simulated")
            .with_warning("3 instruments excluded")
            .with_latency(12);
        let envelope = Envelope::from_result(RequestId::new_v4(), result);

        let mut buffer = Vec::new();
        write_envelope(&mut buffer, &envelope, false).expect("render");
        let text = String::from_utf8(buffer).expect("utf8");
        assert_eq!(text.lines().count(), 1);

        let parsed: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(parsed["meta"]["source"], "simulated");
        assert_eq!(parsed["meta"]["latency_ms"], 12);
        assert_eq!(parsed["meta"]["warnings"][0], "3 instruments excluded");
        assert_eq!(parsed["meta"]["request_id"].as_str().map(str::len), Some(36));
        assert_eq!(parsed["data"], json!({"bars": []}));
    }
}
