//! Artefact gateway host.
//!
//! Installs one artefact from blob storage, keeps an in-memory view of it
//! current across hot swaps, and serves authenticated handler dispatch over
//! HTTP and WebSocket. The heavy lifting lives in `gateway-fetch` and
//! `gateway-dispatch`; this crate owns configuration and process wiring.
//!
//! # Modules
//!
//! - [`artefact_state`] - In-memory view of the live artefact
//! - [`cli`] - Command-line arguments
//! - [`config`] - TOML settings and environment credentials
//! - [`gateway`] - Process wiring
//! - [`handlers`] - Built-in handlers selectable from configuration

pub mod artefact_state;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod handlers;

pub use artefact_state::{ArtefactState, LoadedArtefact};
pub use config::{ConfigError, GatewayConfig, Secrets};
pub use gateway::{Gateway, GatewayError, blob_store};
pub use handlers::{BuiltinHandler, build_registry};
