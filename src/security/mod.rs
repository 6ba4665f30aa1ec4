//! # Security Modules
//!
//! Pluggable credential handling for the connection handshake.
//!
//! The connecting side names its module in the identity message and attaches
//! whatever [`SecurityModule::create_credential`] produced. The server looks
//! the same module up by name, validates the credential and, when the module
//! asks for it, runs a challenge/response exchange over the still-blocking
//! socket before confirming the peer.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::framer::ConnectRequest;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

pub mod none;
pub mod shared_key;

pub use none::NoSecurity;
pub use shared_key::SharedKeySecurity;

/// Byte stream a challenge exchange runs over
pub trait Channel: Read + Write {}

impl<T: Read + Write + ?Sized> Channel for T {}

pub trait SecurityModule: Send + Sync + fmt::Debug {
    /// Name carried in the identity message
    fn name(&self) -> &str;

    /// Credential to attach when connecting, if this module uses one
    fn create_credential(&self) -> Result<Option<Vec<u8>>>;

    /// Check the credential a connecting peer presented
    fn validate_credential(&self, peer: &ConnectRequest, credential: Option<&[u8]>) -> Result<()>;

    /// Whether the server follows validation with a challenge exchange
    fn requires_challenge(&self) -> bool {
        false
    }

    /// Connecting side of the challenge exchange
    fn client_challenge(&self, _channel: &mut dyn Channel) -> Result<()> {
        Err(ProtocolError::NotSupported(format!(
            "{} has no challenge exchange",
            self.name()
        )))
    }

    /// Listening side of the challenge exchange
    fn server_challenge(&self, _channel: &mut dyn Channel) -> Result<()> {
        Err(ProtocolError::NotSupported(format!(
            "{} has no challenge exchange",
            self.name()
        )))
    }
}

/// Modules available to a process, looked up by name
#[derive(Debug, Clone)]
pub struct SecurityRegistry {
    modules: HashMap<String, Arc<dyn SecurityModule>>,
}

impl SecurityRegistry {
    /// Registry holding only the `none` module
    pub fn new() -> Self {
        let mut registry = Self {
            modules: HashMap::new(),
        };
        registry.register(Arc::new(NoSecurity));
        registry
    }

    pub fn register(&mut self, module: Arc<dyn SecurityModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SecurityModule>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::NotSupported(format!("{}: {name}", constants::ERR_UNKNOWN_SECURITY)))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for SecurityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
