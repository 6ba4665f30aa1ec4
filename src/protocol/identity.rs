//! Peer roles, identity flags and protocol versions.

use crate::core::types::ProcId;
use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role the local process plays when connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeerType {
    Client,
    Tool,
    Launcher,
    Singleton,
    Scheduler,
}

/// Marker byte describing the connecting peer and which identity fields follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IdentityFlag {
    SimpleClient = 0,
    LegacyTool = 1,
    LegacyLauncher = 2,
    ToolNeedsId = 3,
    ToolGivenId = 4,
    /// Tool started by a server, identity assigned by that server
    ToolClient = 5,
    LauncherNeedsId = 6,
    LauncherGivenId = 7,
    LauncherClient = 8,
    Singleton = 9,
    Scheduler = 10,
}

impl IdentityFlag {
    pub const ALL: [IdentityFlag; 11] = [
        IdentityFlag::SimpleClient,
        IdentityFlag::LegacyTool,
        IdentityFlag::LegacyLauncher,
        IdentityFlag::ToolNeedsId,
        IdentityFlag::ToolGivenId,
        IdentityFlag::ToolClient,
        IdentityFlag::LauncherNeedsId,
        IdentityFlag::LauncherGivenId,
        IdentityFlag::LauncherClient,
        IdentityFlag::Singleton,
        IdentityFlag::Scheduler,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .ok_or_else(|| ProtocolError::NotSupported(format!("{}: {code}", constants::ERR_INVALID_FLAG)))
    }

    /// Pick the flag for a connecting peer.
    ///
    /// `is_client` marks a tool or launcher that was itself started by a
    /// server and therefore already registered there.
    pub fn select(peer: PeerType, known: Option<&ProcId>, is_client: bool) -> Self {
        match peer {
            PeerType::Client => IdentityFlag::SimpleClient,
            PeerType::Singleton => IdentityFlag::Singleton,
            PeerType::Scheduler => IdentityFlag::Scheduler,
            PeerType::Tool if is_client => IdentityFlag::ToolClient,
            PeerType::Tool if known.is_some() => IdentityFlag::ToolGivenId,
            PeerType::Tool => IdentityFlag::ToolNeedsId,
            PeerType::Launcher if is_client => IdentityFlag::LauncherClient,
            PeerType::Launcher if known.is_some() => IdentityFlag::LauncherGivenId,
            PeerType::Launcher => IdentityFlag::LauncherNeedsId,
        }
    }

    pub fn peer_type(self) -> PeerType {
        match self {
            IdentityFlag::SimpleClient => PeerType::Client,
            IdentityFlag::LegacyTool
            | IdentityFlag::ToolNeedsId
            | IdentityFlag::ToolGivenId
            | IdentityFlag::ToolClient => PeerType::Tool,
            IdentityFlag::LegacyLauncher
            | IdentityFlag::LauncherNeedsId
            | IdentityFlag::LauncherGivenId
            | IdentityFlag::LauncherClient => PeerType::Launcher,
            IdentityFlag::Singleton => PeerType::Singleton,
            IdentityFlag::Scheduler => PeerType::Scheduler,
        }
    }

    /// uid and gid follow the flag
    pub fn carries_credentials(self) -> bool {
        self != IdentityFlag::SimpleClient
    }

    /// A namespace and rank follow the flag (after uid/gid if present)
    pub fn carries_proc(self) -> bool {
        matches!(
            self,
            IdentityFlag::SimpleClient
                | IdentityFlag::ToolGivenId
                | IdentityFlag::ToolClient
                | IdentityFlag::LauncherGivenId
                | IdentityFlag::LauncherClient
                | IdentityFlag::Singleton
                | IdentityFlag::Scheduler
        )
    }

    /// The server assigns this peer an identity during confirmation
    pub fn needs_id(self) -> bool {
        matches!(self, IdentityFlag::ToolNeedsId | IdentityFlag::LauncherNeedsId)
    }

    /// Peer must already be registered with the server as a client
    pub fn is_registered_client(self) -> bool {
        matches!(self, IdentityFlag::SimpleClient | IdentityFlag::Singleton)
    }

    /// Peer learns the server's identity during confirmation
    pub fn receives_server_identity(self) -> bool {
        !self.is_registered_client()
    }
}

impl fmt::Display for IdentityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// `major.minor.release` as exchanged in the identity message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub release: u8,
}

impl ProtocolVersion {
    pub fn new(major: u8, minor: u8, release: u8) -> Self {
        Self { major, minor, release }
    }

    /// 2.0 peers end their identity message after the version string
    pub fn has_short_tail(&self) -> bool {
        self.major == 2 && self.minor == 0
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    /// Accepts `major.minor.release` with optional trailing text on the
    /// release component (`4.2.0rc1`); missing components read as zero.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || ProtocolError::HandshakeError(format!("{}: {s}", constants::ERR_INVALID_VERSION));
        let mut parts = s.splitn(3, '.');
        let mut next = |required: bool| -> Result<u8> {
            match parts.next() {
                Some(part) => {
                    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                    if digits.is_empty() {
                        return Err(bad());
                    }
                    digits.parse().map_err(|_| bad())
                }
                None if required => Err(bad()),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(false)?;
        let release = next(false)?;
        Ok(Self { major, minor, release })
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.release)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flag_codes_round_trip() {
        for flag in IdentityFlag::ALL {
            assert_eq!(IdentityFlag::from_code(flag.code()).unwrap(), flag);
        }
        assert!(matches!(
            IdentityFlag::from_code(11),
            Err(ProtocolError::NotSupported(_))
        ));
    }

    #[test]
    fn selection_follows_role_and_identity() {
        let id = ProcId::new("job", 0).unwrap();
        assert_eq!(IdentityFlag::select(PeerType::Client, Some(&id), false), IdentityFlag::SimpleClient);
        assert_eq!(IdentityFlag::select(PeerType::Tool, None, false), IdentityFlag::ToolNeedsId);
        assert_eq!(IdentityFlag::select(PeerType::Tool, Some(&id), false), IdentityFlag::ToolGivenId);
        assert_eq!(IdentityFlag::select(PeerType::Tool, Some(&id), true), IdentityFlag::ToolClient);
        assert_eq!(IdentityFlag::select(PeerType::Launcher, None, false), IdentityFlag::LauncherNeedsId);
        assert_eq!(IdentityFlag::select(PeerType::Launcher, Some(&id), true), IdentityFlag::LauncherClient);
    }

    #[test]
    fn versions_parse_leniently() {
        assert_eq!("4.2.0".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::new(4, 2, 0));
        assert_eq!("5.0.3rc1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::new(5, 0, 3));
        assert_eq!("3".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::new(3, 0, 0));
        assert!("2.0.1".parse::<ProtocolVersion>().unwrap().has_short_tail());
        assert!("v4".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }
}
