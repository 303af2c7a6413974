//! Built-in handlers selectable from configuration.
//!
//! Configuration binds handler names to built-ins, for example
//! `predict = "artefact_info"`. Each binding becomes a registry entry that
//! shares the gateway's [`ArtefactState`].

use crate::artefact_state::ArtefactState;
use gateway_dispatch::{Handler, HandlerError, HandlerRegistry};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handlers the gateway ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinHandler {
    /// Returns `data` unchanged.
    Echo,
    /// Describes the loaded artefact alongside the request data.
    ArtefactInfo,
}

impl BuiltinHandler {
    /// Name used in configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::ArtefactInfo => "artefact_info",
        }
    }
}

/// A built-in bound to the gateway's artefact state.
#[derive(Debug, Clone)]
pub struct BoundHandler {
    kind: BuiltinHandler,
    state: Arc<ArtefactState>,
}

impl BoundHandler {
    /// Bind `kind` to `state`.
    #[must_use]
    pub const fn new(kind: BuiltinHandler, state: Arc<ArtefactState>) -> Self {
        Self { kind, state }
    }
}

impl Handler for BoundHandler {
    fn call(&self, data: Value) -> Result<Value, HandlerError> {
        match self.kind {
            BuiltinHandler::Echo => Ok(data),
            BuiltinHandler::ArtefactInfo => {
                let artefact = self
                    .state
                    .current()
                    .ok_or_else(|| HandlerError::new("no artefact is loaded"))?;
                Ok(json!({
                    "artefact": serde_json::to_value(artefact.as_ref())?,
                    "input": data,
                }))
            }
        }
    }
}

/// Build the handler registry from configured bindings.
#[must_use]
pub fn build_registry(
    bindings: &BTreeMap<String, BuiltinHandler>,
    state: &Arc<ArtefactState>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (name, kind) in bindings {
        log::debug!("binding handler `{name}` to built-in `{}`", kind.name());
        registry.register(name.as_str(), BoundHandler::new(*kind, Arc::clone(state)));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use gateway_fetch::{ArtefactReloader, InstalledArtefact};

    fn loaded_state() -> (tempfile::TempDir, Arc<ArtefactState>) {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::try_from(temp.path().join("model.pkl")).expect("UTF-8 path");
        std::fs::write(&path, b"weights").expect("write");
        let state = Arc::new(ArtefactState::new());
        state
            .reload(&InstalledArtefact {
                path,
                digest: "abc123".to_owned(),
                size_bytes: 7,
                unpacked: false,
            })
            .expect("reload");
        (temp, state)
    }

    #[test]
    fn echo_returns_its_input() {
        let handler = BoundHandler::new(BuiltinHandler::Echo, Arc::new(ArtefactState::new()));
        assert_eq!(handler.call(json!({"x": 1})), Ok(json!({"x": 1})));
    }

    #[test]
    fn artefact_info_describes_the_loaded_version() {
        let (_temp, state) = loaded_state();
        let handler = BoundHandler::new(BuiltinHandler::ArtefactInfo, state);

        let value = handler.call(json!({"x": 1})).expect("call");

        assert_eq!(value["artefact"]["digest"], "abc123");
        assert_eq!(value["artefact"]["size_bytes"], 7);
        assert_eq!(value["input"], json!({"x": 1}));
    }

    #[test]
    fn artefact_info_fails_before_anything_is_loaded() {
        let handler =
            BoundHandler::new(BuiltinHandler::ArtefactInfo, Arc::new(ArtefactState::new()));
        let err = handler.call(Value::Null).expect_err("nothing loaded");
        assert_eq!(err.reason(), "no artefact is loaded");
    }

    #[test]
    fn registry_contains_every_binding() {
        let bindings = BTreeMap::from([
            ("predict".to_owned(), BuiltinHandler::ArtefactInfo),
            ("echo".to_owned(), BuiltinHandler::Echo),
        ]);

        let registry = build_registry(&bindings, &Arc::new(ArtefactState::new()));

        assert_eq!(registry.names().collect::<Vec<_>>(), ["echo", "predict"]);
    }
}
