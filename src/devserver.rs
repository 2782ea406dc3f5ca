//! Dev-server wire contract. The HTTP/WebSocket transport that carries
//! these messages is external — this module only defines the message
//! shapes and the sink seam an embedder implements, narrowed to exactly
//! the closed message set named below (no `Welcome`/`Ping`/state-snapshot
//! framing, which belong to the out-of-scope transport).

use serde::{Deserialize, Serialize};

use crate::hmr::HmrDirective;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Reload,
    #[serde(rename = "component-reload")]
    ComponentReload { component: String, path: String },
    #[serde(rename = "module-accept")]
    ModuleAccept { module: String, url: String },
    #[serde(rename = "library-swap")]
    LibrarySwap { global: String, url: String },
    Error { message: String, source: ErrorSource },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Compile,
    Runtime,
}

/// The closed set of categories a browser client may report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClientErrorCategory {
    UncaughtError,
    UnhandledRejection,
    HmrHelperFailed,
    HmrHelperException,
    HmrHelperNoLibraryInfo,
    VueHmr,
    LibraryHotreload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    ClientError { category: ClientErrorCategory, error: serde_json::Value, context: serde_json::Value },
}

pub type ClientErrorMessage = ClientMessage;

impl From<HmrDirective> for ServerMessage {
    fn from(directive: HmrDirective) -> Self {
        match directive {
            HmrDirective::SelfAccept { module_id } => {
                ServerMessage::ModuleAccept { module: module_id, url: String::new() }
            }
            HmrDirective::Propagate { module_id, .. } => {
                ServerMessage::ModuleAccept { module: module_id, url: String::new() }
            }
            HmrDirective::ComponentReload { component_id } => {
                ServerMessage::ComponentReload { component: component_id, path: String::new() }
            }
            HmrDirective::FullReload { .. } => ServerMessage::Reload,
            HmrDirective::LibraryHotSwap { global_name, new_url } => {
                ServerMessage::LibrarySwap { global: global_name, url: new_url }
            }
        }
    }
}

/// The seam an embedding dev server implements to actually deliver these
/// messages over its transport (WebSocket, SSE, whatever it chooses).
/// This crate never constructs a listener; it only produces `ServerMessage`
/// values and consumes `ClientErrorMessage` values through this trait.
pub trait DevServerSink: Send + Sync {
    fn send(&self, message: ServerMessage);
    fn on_client_error(&self, message: ClientMessage);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_serializes_to_spec_shape() {
        let json = serde_json::to_value(ServerMessage::Reload).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "reload" }));
    }

    #[test]
    fn component_reload_round_trips() {
        let msg = ServerMessage::ComponentReload { component: "Foo".into(), path: "src/Foo.sfc".into() };
        let json = serde_json::to_value(&msg).unwrap();
        let back: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn client_error_category_is_closed_set() {
        let json = serde_json::json!({
            "type": "client-error",
            "category": "uncaught-error",
            "error": {},
            "context": {},
        });
        let parsed: ClientMessage = serde_json::from_value(json).unwrap();
        let ClientMessage::ClientError { category, .. } = parsed;
        assert_eq!(category, ClientErrorCategory::UncaughtError);
    }
}
