use std::fmt;

use cosmwasm_std::StdError;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ContractError {
    #[error("{0}")]
    Std(#[from] StdError),

    // Validation
    #[error("Invalid creator address: {address}")]
    InvalidCreator { address: String },

    #[error("Invalid DID: {reason}")]
    InvalidDid { reason: String },

    #[error("Invalid {field} address: {address}")]
    InvalidAddress { field: String, address: String },

    #[error("Invalid DID document: {reason}")]
    InvalidDocument { reason: String },

    #[error("DID document too large: {size} bytes (max {max})")]
    DocumentTooLarge { size: u64, max: u64 },

    #[error("{field} must not be empty")]
    EmptyField { field: String },

    #[error("Invalid proposal ttl {ttl} (must be between 1 and {max} seconds)")]
    InvalidTtl { ttl: u64, max: u64 },

    #[error("New controller is already the controller of {did_id}")]
    SameController { did_id: String },

    #[error("Controller cannot be its own guardian")]
    SelfGuardian {},

    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    // Not found
    #[error("DID not found: {id}")]
    DidNotFound { id: String },

    #[error("Version {version} of {id} not found")]
    VersionNotFound { id: String, version: u64 },

    #[error("Verification method not found: {id}")]
    VerificationMethodNotFound { id: String },

    #[error("Service not found: {id}")]
    ServiceNotFound { id: String },

    #[error("Guardian {guardian} not found for {did_id}")]
    GuardianNotFound { did_id: String, guardian: String },

    #[error("Recovery proposal not found: {id}")]
    ProposalNotFound { id: u64 },

    // Conflict
    #[error("DID already exists: {id}")]
    DidExists { id: String },

    #[error("Version conflict: current {current}, proposed {proposed}")]
    VersionConflict { current: u64, proposed: u64 },

    #[error("Verification method already exists: {id}")]
    DuplicateVerificationMethod { id: String },

    #[error("Service already exists: {id}")]
    DuplicateService { id: String },

    #[error("Guardian {guardian} already active for {did_id}")]
    DuplicateGuardian { did_id: String, guardian: String },

    #[error("Guardian has already voted on this proposal")]
    AlreadyVoted {},

    #[error("Guardian has already voted the other way on this proposal")]
    ConflictingVote {},

    #[error("Signature share already submitted")]
    DuplicateSignatureShare {},

    #[error("Guardian limit reached ({max})")]
    MaxGuardiansReached { max: u32 },

    // Authorization
    #[error("Unauthorized")]
    Unauthorized {},

    #[error("Sender is not an active guardian of {did_id}")]
    NotAGuardian { did_id: String },

    // State
    #[error("Invalid DID state transition from {from} to {to}")]
    InvalidDidState { from: String, to: String },

    #[error("DID is {state}, operation requires an active DID")]
    DidNotOperable { state: String },

    #[error("Verification method already revoked: {id}")]
    KeyRevoked { id: String },

    #[error("Proposal is {status}, expected {expected}")]
    InvalidProposalStatus { status: String, expected: String },

    #[error("Cannot migrate: {reason}")]
    InvalidMigration { reason: String },

    // Temporal
    #[error("Recovery proposal {id} expired at {expires_at}")]
    ProposalExpired { id: u64, expires_at: u64 },

    #[error("Recovery proposal {id} does not expire until {expires_at}")]
    ProposalNotExpired { id: u64, expires_at: u64 },
}

/// Coarse classification of a failure, independent of the variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Authorization,
    State,
    Temporal,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::Temporal => "temporal",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ContractError {
    pub fn kind(&self) -> ErrorKind {
        use ContractError::*;
        match self {
            Std(StdError::NotFound { .. }) => ErrorKind::NotFound,
            Std(_) => ErrorKind::Internal,
            InvalidCreator { .. }
            | InvalidDid { .. }
            | InvalidAddress { .. }
            | InvalidDocument { .. }
            | DocumentTooLarge { .. }
            | EmptyField { .. }
            | InvalidTtl { .. }
            | SameController { .. }
            | SelfGuardian {}
            | InvalidConfig { .. } => ErrorKind::Validation,
            DidNotFound { .. }
            | VersionNotFound { .. }
            | VerificationMethodNotFound { .. }
            | ServiceNotFound { .. }
            | GuardianNotFound { .. }
            | ProposalNotFound { .. } => ErrorKind::NotFound,
            DidExists { .. }
            | VersionConflict { .. }
            | DuplicateVerificationMethod { .. }
            | DuplicateService { .. }
            | DuplicateGuardian { .. }
            | AlreadyVoted {}
            | ConflictingVote {}
            | DuplicateSignatureShare {}
            | MaxGuardiansReached { .. } => ErrorKind::Conflict,
            Unauthorized {} | NotAGuardian { .. } => ErrorKind::Authorization,
            InvalidDidState { .. }
            | DidNotOperable { .. }
            | KeyRevoked { .. }
            | InvalidProposalStatus { .. }
            | InvalidMigration { .. } => ErrorKind::State,
            ProposalExpired { .. } | ProposalNotExpired { .. } => ErrorKind::Temporal,
        }
    }
}
