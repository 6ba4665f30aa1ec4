use super::SecurityModule;
use crate::error::Result;
use crate::protocol::framer::ConnectRequest;

/// Accepts every peer and sends no credential
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

impl SecurityModule for NoSecurity {
    fn name(&self) -> &str {
        "none"
    }

    fn create_credential(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn validate_credential(&self, _peer: &ConnectRequest, _credential: Option<&[u8]>) -> Result<()> {
        Ok(())
    }
}
