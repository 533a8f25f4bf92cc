use std::collections::BTreeMap;
use std::fmt;

use cosmwasm_schema::cw_serde;
use cosmwasm_std::Addr;
use cw_storage_plus::{Item, Map};

#[cw_serde]
pub struct Config {
    /// May update this config
    pub admin: Addr,
    /// Record `document_accessed` on audited reads
    pub audit_reads: bool,
    /// Proposal lifetime when the proposer does not pick one (seconds)
    pub default_proposal_ttl: u64,
    /// Upper bound on a proposal lifetime (seconds)
    pub max_proposal_ttl: u64,
    /// Active guardians allowed per DID
    pub max_guardians: u32,
    /// Serialized document payload limit (bytes)
    pub max_document_size: u64,
}

#[cw_serde]
#[derive(Copy, Eq)]
pub enum DidState {
    Active,
    Inactive,
    Suspended,
    Revoked,
    Recovering,
    Migrating,
}

impl DidState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DidState::Active => "active",
            DidState::Inactive => "inactive",
            DidState::Suspended => "suspended",
            DidState::Revoked => "revoked",
            DidState::Recovering => "recovering",
            DidState::Migrating => "migrating",
        }
    }

    /// Outgoing edges of the lifecycle graph. `Revoked` has none.
    pub fn allowed_transitions(&self) -> &'static [DidState] {
        match self {
            DidState::Active => &[
                DidState::Inactive,
                DidState::Suspended,
                DidState::Revoked,
                DidState::Migrating,
            ],
            DidState::Inactive
            | DidState::Suspended
            | DidState::Recovering
            | DidState::Migrating => &[DidState::Active, DidState::Revoked],
            DidState::Revoked => &[],
        }
    }

    pub fn can_transition_to(&self, to: DidState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub const ALL: [DidState; 6] = [
        DidState::Active,
        DidState::Inactive,
        DidState::Suspended,
        DidState::Revoked,
        DidState::Recovering,
        DidState::Migrating,
    ];
}

impl fmt::Display for DidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cw_serde]
#[derive(Copy, Eq, Default)]
pub enum SecurityLevel {
    Basic,
    #[default]
    Standard,
    High,
    Critical,
}

#[cw_serde]
#[derive(Copy, Eq, Default)]
pub enum CriticalityLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[cw_serde]
#[derive(Copy, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[cw_serde]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub last_checked: u64,
    pub errors: Vec<String>,
}

#[cw_serde]
pub struct DidStatus {
    pub state: DidState,
    pub reason: String,
    pub updated_at: u64,
    pub updated_by: Addr,
    pub health_check: HealthCheck,
}

#[cw_serde]
pub struct DidMetadata {
    pub created: u64,
    pub updated: u64,
    /// Mirrors `version` as a string
    pub version_id: String,
    pub deactivated: bool,
    pub deactivated_at: Option<u64>,
    pub tags: Vec<String>,
    pub organization_id: Option<String>,
    /// dev, staging, prod
    pub environment: String,
    pub criticality_level: CriticalityLevel,
}

#[cw_serde]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    pub public_key_multibase: Option<String>,
    pub public_key_jwk: Option<BTreeMap<String, String>>,
    pub security_level: SecurityLevel,
    pub hsm_backed: bool,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub revoked: bool,
    pub revoked_at: Option<u64>,
}

impl VerificationMethod {
    pub fn has_key_material(&self) -> bool {
        self.public_key_multibase
            .as_deref()
            .map_or(false, |key| !key.is_empty())
            || self
                .public_key_jwk
                .as_ref()
                .map_or(false, |jwk| !jwk.is_empty())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.map_or(false, |expires| now >= expires)
    }

    /// Not revoked and not past its expiry
    pub fn is_usable_at(&self, now: u64) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

/// Service sub-policies. Stored verbatim, never interpreted here.
#[cw_serde]
#[derive(Default)]
pub struct ServicePolicies {
    pub security: Option<String>,
    pub access_control: Option<String>,
    pub monitoring: Option<String>,
    pub compliance: Option<String>,
}

#[cw_serde]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
    pub description: Option<String>,
    pub policies: ServicePolicies,
}

#[cw_serde]
pub struct DidDocument {
    pub context: Vec<String>,
    /// did:<method>:<identifier>, immutable
    pub id: String,
    /// Addresses allowed to manage the document
    pub controller: Vec<String>,
    pub verification_method: Vec<VerificationMethod>,
    pub authentication: Vec<String>,
    pub service: Vec<Service>,
    pub status: DidStatus,
    pub metadata: DidMetadata,
    /// Starts at 1, strictly increases on every write
    pub version: u64,
    pub creator: Addr,
    pub created_at: u64,
    pub updated_at: u64,
    pub chain_id: String,
    pub block_height: u64,
    pub tx_hash: String,
}

impl DidDocument {
    pub fn state(&self) -> DidState {
        self.status.state
    }

    pub fn find_method(&self, method_id: &str) -> Option<&VerificationMethod> {
        self.verification_method.iter().find(|vm| vm.id == method_id)
    }
}

/// Metadata index entry, one per document
#[cw_serde]
pub struct DocumentMetadata {
    pub id: String,
    pub creator: Addr,
    pub version: u64,
    pub state: DidState,
    pub organization_id: Option<String>,
    pub environment: String,
    pub criticality_level: CriticalityLevel,
    pub tags: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DocumentMetadata {
    pub fn of(doc: &DidDocument) -> Self {
        DocumentMetadata {
            id: doc.id.clone(),
            creator: doc.creator.clone(),
            version: doc.version,
            state: doc.status.state,
            organization_id: doc.metadata.organization_id.clone(),
            environment: doc.metadata.environment.clone(),
            criticality_level: doc.metadata.criticality_level,
            tags: doc.metadata.tags.clone(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

#[cw_serde]
pub struct Guardian {
    pub did_id: String,
    pub guardian_address: Addr,
    pub public_key: String,
    /// Removal clears this flag, the row stays
    pub active: bool,
    pub added_at: u64,
}

#[cw_serde]
#[derive(Copy, Eq)]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
            ProposalStatus::Executed => "executed",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cw_serde]
pub struct RecoveryProposal {
    pub id: u64,
    pub did_id: String,
    pub proposer: Addr,
    pub new_controller: Addr,
    pub reason: String,
    pub status: ProposalStatus,
    pub approvals: Vec<Addr>,
    pub rejections: Vec<Addr>,
    pub created_at: u64,
    pub expires_at: u64,
    pub executed_at: Option<u64>,
}

impl RecoveryProposal {
    pub fn has_approved(&self, guardian: &Addr) -> bool {
        self.approvals.contains(guardian)
    }

    pub fn has_rejected(&self, guardian: &Addr) -> bool {
        self.rejections.contains(guardian)
    }

    /// Status as the clock sees it; a stored `Pending` past its deadline reads as `Expired`
    pub fn effective_status(&self, now: u64) -> ProposalStatus {
        if self.status == ProposalStatus::Pending && shared::is_expired(now, self.expires_at) {
            ProposalStatus::Expired
        } else {
            self.status
        }
    }
}

#[cw_serde]
pub struct SignatureShare {
    pub proposal_id: u64,
    pub signer: Addr,
    pub signature_share: String,
    pub public_key_share: String,
    pub signed_at: u64,
}

#[cw_serde]
#[derive(Copy, Eq)]
pub enum AuditAction {
    DocumentCreated,
    DocumentUpdated,
    DocumentAccessed,
    StateTransitioned,
    VerificationMethodAdded,
    VerificationMethodRevoked,
    ServiceAdded,
    ServiceRemoved,
    HealthChecked,
    GuardianAdded,
    GuardianRemoved,
    RecoveryProposed,
    RecoveryApproved,
    RecoveryRejected,
    RecoveryExecuted,
    RecoveryExpired,
    RecoveryRetallied,
    SignatureShareSubmitted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::DocumentCreated => "document_created",
            AuditAction::DocumentUpdated => "document_updated",
            AuditAction::DocumentAccessed => "document_accessed",
            AuditAction::StateTransitioned => "state_transitioned",
            AuditAction::VerificationMethodAdded => "verification_method_added",
            AuditAction::VerificationMethodRevoked => "verification_method_revoked",
            AuditAction::ServiceAdded => "service_added",
            AuditAction::ServiceRemoved => "service_removed",
            AuditAction::HealthChecked => "health_checked",
            AuditAction::GuardianAdded => "guardian_added",
            AuditAction::GuardianRemoved => "guardian_removed",
            AuditAction::RecoveryProposed => "recovery_proposed",
            AuditAction::RecoveryApproved => "recovery_approved",
            AuditAction::RecoveryRejected => "recovery_rejected",
            AuditAction::RecoveryExecuted => "recovery_executed",
            AuditAction::RecoveryExpired => "recovery_expired",
            AuditAction::RecoveryRetallied => "recovery_retallied",
            AuditAction::SignatureShareSubmitted => "signature_share_submitted",
        }
    }
}

#[cw_serde]
pub struct AuditEntry {
    /// Insertion sequence, global across DIDs
    pub id: u64,
    pub did: String,
    pub action: AuditAction,
    pub actor: Addr,
    pub timestamp: u64,
    pub block_height: u64,
    pub tx_hash: String,
    pub proposal_id: Option<u64>,
    pub data: BTreeMap<String, String>,
}

/// Page size for list queries when the caller gives none
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

pub fn page_limit(limit: Option<u32>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize
}

/// Configuration storage
pub const CONFIG: Item<Config> = Item::new("config");

/// Current DID documents by id
pub const DOCUMENTS: Map<&str, DidDocument> = Map::new("documents");

/// Archived pre-write snapshots by (id, version)
pub const DOCUMENT_VERSIONS: Map<(&str, u64), DidDocument> = Map::new("document_versions");

/// Metadata index by id
pub const METADATA: Map<&str, DocumentMetadata> = Map::new("metadata");

/// Metadata index: (organization, did)
pub const DIDS_BY_ORGANIZATION: Map<(&str, &str), ()> = Map::new("dids_by_organization");

/// Metadata index: (state, did)
pub const DIDS_BY_STATE: Map<(&str, &str), ()> = Map::new("dids_by_state");

/// Next audit entry id
pub const NEXT_AUDIT_ID: Item<u64> = Item::new("next_audit_id");

/// Audit entries by id, append-only
pub const AUDIT_LOG: Map<u64, AuditEntry> = Map::new("audit_log");

/// Audit entries by DID (for queries)
pub const AUDIT_BY_DID: Map<(&str, u64), ()> = Map::new("audit_by_did");

/// Audit entries by proposal (for queries)
pub const AUDIT_BY_PROPOSAL: Map<(u64, u64), ()> = Map::new("audit_by_proposal");

/// Guardians by (did, guardian)
pub const GUARDIANS: Map<(&str, &Addr), Guardian> = Map::new("guardians");

/// Reverse index: (guardian, did)
pub const GUARDED_DIDS: Map<(&Addr, &str), ()> = Map::new("guarded_dids");

/// Next recovery proposal id
pub const NEXT_PROPOSAL_ID: Item<u64> = Item::new("next_proposal_id");

/// Recovery proposals by id
pub const PROPOSALS: Map<u64, RecoveryProposal> = Map::new("proposals");

/// Recovery proposals by DID (for queries)
pub const PROPOSALS_BY_DID: Map<(&str, u64), ()> = Map::new("proposals_by_did");

/// Ids of proposals whose stored status is `Pending`
pub const PENDING_PROPOSALS: Map<u64, ()> = Map::new("pending_proposals");

/// Threshold signature shares by (proposal, signer)
pub const SIGNATURE_SHARES: Map<(u64, &Addr), SignatureShare> = Map::new("signature_shares");
