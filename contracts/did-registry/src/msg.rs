use std::collections::BTreeMap;

use cosmwasm_schema::{cw_serde, QueryResponses};

use crate::state::{
    AuditEntry, Config, CriticalityLevel, DidDocument, DidState, DocumentMetadata, Guardian,
    ProposalStatus, RecoveryProposal, SecurityLevel, Service, SignatureShare,
};

#[cw_serde]
#[derive(Default)]
pub struct InstantiateMsg {
    /// Defaults to the instantiating sender
    pub admin: Option<String>,
    pub audit_reads: Option<bool>,
    pub default_proposal_ttl: Option<u64>,
    pub max_proposal_ttl: Option<u64>,
    pub max_guardians: Option<u32>,
    pub max_document_size: Option<u64>,
}

/// Client-supplied document content. Provenance, status and timestamps are
/// filled in by the contract.
#[cw_serde]
#[derive(Default)]
pub struct DocumentPayload {
    pub context: Vec<String>,
    /// Defaults to the creator when empty
    pub controller: Vec<String>,
    pub verification_method: Vec<VerificationMethodInput>,
    pub authentication: Vec<String>,
    pub service: Vec<Service>,
    pub tags: Vec<String>,
    pub organization_id: Option<String>,
    pub environment: Option<String>,
    pub criticality_level: Option<CriticalityLevel>,
}

#[cw_serde]
pub struct VerificationMethodInput {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    pub public_key_multibase: Option<String>,
    pub public_key_jwk: Option<BTreeMap<String, String>>,
    pub security_level: Option<SecurityLevel>,
    pub hsm_backed: bool,
    pub expires_at: Option<u64>,
}

#[cw_serde]
pub enum ExecuteMsg {
    /// Change configuration (admin)
    UpdateConfig {
        admin: Option<String>,
        audit_reads: Option<bool>,
        default_proposal_ttl: Option<u64>,
        max_proposal_ttl: Option<u64>,
        max_guardians: Option<u32>,
        max_document_size: Option<u64>,
    },
    /// Create a DID document owned by the sender
    CreateDid {
        id: String,
        document: DocumentPayload,
    },
    /// Replace document content; `version` must exceed the stored one
    UpdateDid {
        id: String,
        version: u64,
        document: DocumentPayload,
    },
    /// Move an active document to inactive
    DeactivateDid { id: String },
    /// Audited resolution, returns the document as response data
    ResolveDid { id: String },
    /// Move a document along the lifecycle graph
    TransitionState {
        id: String,
        new_state: DidState,
        reason: String,
    },
    AddVerificationMethod {
        id: String,
        method: VerificationMethodInput,
    },
    RevokeVerificationMethod { id: String, method_id: String },
    AddService { id: String, service: Service },
    RemoveService { id: String, service_id: String },
    /// Re-derive the document's health check
    CheckHealth { id: String },
    /// Register a recovery guardian (controller)
    AddGuardian {
        did_id: String,
        guardian_address: String,
        public_key: String,
    },
    /// Deactivate a recovery guardian (controller)
    RemoveGuardian {
        did_id: String,
        guardian_address: String,
    },
    /// Open a recovery proposal (active guardian)
    ProposeRecovery {
        did_id: String,
        new_controller: String,
        reason: String,
        ttl_seconds: Option<u64>,
    },
    ApproveRecovery { proposal_id: u64 },
    RejectRecovery {
        proposal_id: u64,
        reason: Option<String>,
    },
    /// Hand control of the DID to the proposal's new controller (active guardian)
    ExecuteRecovery { proposal_id: u64 },
    /// Mark an overdue pending proposal as expired (anyone)
    ExpireProposal { proposal_id: u64 },
    /// Expire overdue pending proposals in id order (anyone)
    SweepExpiredProposals { limit: Option<u32> },
    /// Attach a threshold signature share to a proposal (active guardian)
    SubmitSignatureShare {
        proposal_id: u64,
        signature_share: String,
        public_key_share: String,
    },
}

#[cw_serde]
pub enum SudoMsg {
    /// End-of-block sweep of overdue pending proposals
    EndBlock {},
}

#[cw_serde]
pub struct MigrateMsg {}

#[cw_serde]
#[derive(QueryResponses)]
pub enum QueryMsg {
    #[returns(Config)]
    Config {},

    /// Current document by id
    #[returns(DocumentResponse)]
    GetDocument { id: String },

    #[returns(ExistsResponse)]
    DocumentExists { id: String },

    /// Archived snapshot of a document at `version`
    #[returns(DocumentResponse)]
    GetDocumentVersion { id: String, version: u64 },

    /// Archived snapshots in ascending version order
    #[returns(DocumentHistoryResponse)]
    GetDocumentHistory {
        id: String,
        start_after: Option<u64>,
        limit: Option<u32>,
    },

    /// Metadata entries, optionally filtered by organization and/or state
    #[returns(DocumentsResponse)]
    ListDocuments {
        organization_id: Option<String>,
        state: Option<DidState>,
        start_after: Option<String>,
        limit: Option<u32>,
    },

    #[returns(VerifyCredentialResponse)]
    VerifyCredential {
        did_id: String,
        verification_method_id: String,
    },

    /// All guardian rows for a DID, active and inactive
    #[returns(GuardiansResponse)]
    GetGuardians { did_id: String },

    #[returns(IsGuardianResponse)]
    IsGuardian { did_id: String, address: String },

    #[returns(ActiveGuardianCountResponse)]
    GetActiveGuardianCount { did_id: String },

    /// DIDs that list `guardian`
    #[returns(GuardedDidsResponse)]
    GetGuardedDids { guardian: String },

    #[returns(ProposalResponse)]
    GetProposal { proposal_id: u64 },

    #[returns(ProposalsResponse)]
    GetProposalsByDid {
        did_id: String,
        start_after: Option<u64>,
        limit: Option<u32>,
    },

    /// Proposals whose stored status is pending
    #[returns(ProposalsResponse)]
    GetPendingProposals {
        start_after: Option<u64>,
        limit: Option<u32>,
    },

    #[returns(SignatureSharesResponse)]
    GetSignatureShares { proposal_id: u64 },

    /// Audit entries for a DID in insertion order; `limit` 0 or unset returns all
    #[returns(AuditLogResponse)]
    GetAuditLog {
        did_id: String,
        start_after: Option<u64>,
        limit: Option<u32>,
    },

    #[returns(AuditLogResponse)]
    GetProposalAuditLog {
        proposal_id: u64,
        limit: Option<u32>,
    },

    /// Run every consistency check at the current block time
    #[returns(InvariantsResponse)]
    CheckInvariants {},
}

// Response types

#[cw_serde]
pub struct DocumentResponse {
    pub document: DidDocument,
}

#[cw_serde]
pub struct ExistsResponse {
    pub exists: bool,
}

#[cw_serde]
pub struct DocumentHistoryResponse {
    pub versions: Vec<DidDocument>,
}

#[cw_serde]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentMetadata>,
}

#[cw_serde]
pub struct VerifyCredentialResponse {
    pub valid: bool,
    pub reason: String,
}

#[cw_serde]
pub struct GuardiansResponse {
    pub guardians: Vec<Guardian>,
}

#[cw_serde]
pub struct IsGuardianResponse {
    pub is_guardian: bool,
}

#[cw_serde]
pub struct ActiveGuardianCountResponse {
    pub did_id: String,
    pub count: u64,
    /// Approvals needed for a recovery proposal
    pub threshold: u64,
}

#[cw_serde]
pub struct GuardedDidsResponse {
    pub did_ids: Vec<String>,
}

#[cw_serde]
pub struct ProposalResponse {
    pub proposal: RecoveryProposal,
    pub status: ProposalStatus,
    /// `expired` for a stored pending proposal past its deadline
    pub effective_status: ProposalStatus,
    pub active_guardians: u64,
    pub threshold: u64,
}

#[cw_serde]
pub struct ProposalsResponse {
    pub proposals: Vec<ProposalResponse>,
}

#[cw_serde]
pub struct SignatureSharesResponse {
    pub shares: Vec<SignatureShare>,
}

#[cw_serde]
pub struct AuditLogResponse {
    pub entries: Vec<AuditEntry>,
}

#[cw_serde]
pub struct SweepResponse {
    pub expired: Vec<u64>,
}

#[cw_serde]
pub struct InvariantReport {
    pub name: String,
    pub broken: bool,
    pub violations: Vec<String>,
}

#[cw_serde]
pub struct InvariantsResponse {
    pub broken: bool,
    pub reports: Vec<InvariantReport>,
}
