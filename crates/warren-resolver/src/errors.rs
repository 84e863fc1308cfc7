//! The error taxonomy shared by the resolvers.

use warren_types::protocol::deserialise::DecodeError;
use warren_types::protocol::types::Rcode;

/// An error signalled by a remote nameserver, or derived from its
/// response code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ProtocolError {
    /// NXDOMAIN: the name does not exist.  Also raised for a
    /// no-data response, where the name may exist but has no records
    /// of the requested type.
    NameError,
    ServerFailure,
    Refused,
    NotImplemented,
    FormatError,
}

impl ProtocolError {
    /// The error corresponding to a response code, if it is an error
    /// code this taxonomy covers.
    pub fn from_rcode(rcode: Rcode) -> Option<Self> {
        match rcode {
            Rcode::NoError | Rcode::Reserved(_) => None,
            Rcode::FormatError => Some(ProtocolError::FormatError),
            Rcode::ServerFailure => Some(ProtocolError::ServerFailure),
            Rcode::NameError => Some(ProtocolError::NameError),
            Rcode::NotImplemented => Some(ProtocolError::NotImplemented),
            Rcode::Refused => Some(ProtocolError::Refused),
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProtocolError::NameError => write!(f, "name does not exist"),
            ProtocolError::ServerFailure => write!(f, "nameserver failure"),
            ProtocolError::Refused => write!(f, "nameserver refused the query"),
            ProtocolError::NotImplemented => {
                write!(f, "nameserver does not implement this kind of query")
            }
            ProtocolError::FormatError => write!(f, "nameserver could not parse the query"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// An error from a whole resolution attempt.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResolverError {
    /// Followed more CNAME redirections than the configured depth
    /// allows.
    CnameLoop,

    /// The resolution loop ran too many iterations without reaching
    /// an answer.
    IterationLimit,

    /// Every candidate nameserver failed at the transport level.
    NoReachableNameserver,

    /// A nameserver signalled an error, or answered with nothing.
    Protocol(ProtocolError),

    /// A nameserver response could not be decoded.
    Decode(DecodeError),
}

impl From<ProtocolError> for ResolverError {
    fn from(error: ProtocolError) -> Self {
        ResolverError::Protocol(error)
    }
}

impl From<DecodeError> for ResolverError {
    fn from(error: DecodeError) -> Self {
        ResolverError::Decode(error)
    }
}

impl std::fmt::Display for ResolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ResolverError::CnameLoop => write!(f, "CNAME chain too long"),
            ResolverError::IterationLimit => write!(f, "resolution did not converge"),
            ResolverError::NoReachableNameserver => {
                write!(f, "no candidate nameserver could be reached")
            }
            ResolverError::Protocol(error) => error.fmt(f),
            ResolverError::Decode(error) => write!(f, "bad nameserver response: {error}"),
        }
    }
}

impl std::error::Error for ResolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolverError::Protocol(error) => Some(error),
            ResolverError::Decode(error) => Some(error),
            _ => None,
        }
    }
}
