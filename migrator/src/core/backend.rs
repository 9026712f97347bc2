//! Interactive shell backends the session adapter can drive.
//!
//! Backends differ only in the executable name and the banner substring they
//! print once ready to accept commands. The protocol itself is shared.

use serde::{Deserialize, Serialize};

/// Known interactive shell clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Legacy `mongo` shell.
    Mongo,
    /// `mongosh`.
    Mongosh,
}

impl Backend {
    pub fn binary(self) -> &'static str {
        match self {
            Self::Mongo => "mongo",
            Self::Mongosh => "mongosh",
        }
    }

    pub fn ready_sentinel(self) -> &'static str {
        match self {
            Self::Mongo => "MongoDB server version",
            Self::Mongosh => "You may want to copy or rename",
        }
    }

    /// Resolve to a launchable spec, optionally overriding the executable path.
    pub fn spec(self, binary_override: Option<&str>) -> BackendSpec {
        BackendSpec {
            binary: binary_override.unwrap_or(self.binary()).to_string(),
            ready_sentinel: self.ready_sentinel().to_string(),
        }
    }
}

/// What the session needs to launch and handshake with a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub binary: String,
    pub ready_sentinel: String,
}

/// Line printed by the backend when a loaded script evaluated successfully.
pub const SUCCESS_SENTINEL: &str = "true";

/// Command that asks the backend to exit.
pub const EXIT_COMMAND: &str = "exit";

/// Command that loads and evaluates a script file.
pub fn load_command(path: &str) -> String {
    format!("load(\"{}\")", escape_js_string(path))
}

/// Command that echoes `token` on its own line.
pub fn echo_command(token: &str) -> String {
    format!("print(\"{}\")", escape_js_string(token))
}

fn escape_js_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_uses_backend_defaults() {
        let spec = Backend::Mongo.spec(None);
        assert_eq!(spec.binary, "mongo");
        assert_eq!(spec.ready_sentinel, "MongoDB server version");
    }

    #[test]
    fn spec_override_keeps_sentinel() {
        let spec = Backend::Mongosh.spec(Some("/opt/bin/mongosh"));
        assert_eq!(spec.binary, "/opt/bin/mongosh");
        assert_eq!(spec.ready_sentinel, "You may want to copy or rename");
    }

    #[test]
    fn load_command_escapes_path() {
        assert_eq!(load_command("/tmp/a.js"), "load(\"/tmp/a.js\")");
        assert_eq!(
            load_command("C:\\tmp\\a\"b.js"),
            "load(\"C:\\\\tmp\\\\a\\\"b.js\")"
        );
    }

    #[test]
    fn backend_parses_lowercase() {
        let parsed: Backend = serde_json::from_str("\"mongosh\"").expect("parse");
        assert_eq!(parsed, Backend::Mongosh);
    }
}
