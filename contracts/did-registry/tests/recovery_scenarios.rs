use cosmwasm_std::{from_json, Addr};
use cw_multi_test::{App, AppResponse, ContractWrapper, Executor};
use serde::de::DeserializeOwned;

use did_registry::contract::{execute, instantiate, query, sudo};
use did_registry::msg::{
    AuditLogResponse, DocumentPayload, DocumentResponse, ExecuteMsg, GuardiansResponse,
    InstantiateMsg, InvariantsResponse, ProposalResponse, ProposalsResponse, QueryMsg, SudoMsg,
    SweepResponse, VerificationMethodInput,
};
use did_registry::state::{AuditAction, DidState, ProposalStatus};
use did_registry::{ContractError, ErrorKind};

const DID: &str = "did:persona:abc";
const OWNER: &str = "alice";
const GUARDIANS: [&str; 3] = ["guardian1", "guardian2", "guardian3"];
const NEW_OWNER: &str = "newowner";

struct Suite {
    app: App,
    contract: Addr,
}

impl Suite {
    fn new() -> Self {
        let mut app = App::default();
        let code = ContractWrapper::new(execute, instantiate, query).with_sudo(sudo);
        let code_id = app.store_code(Box::new(code));
        let contract = app
            .instantiate_contract(
                code_id,
                Addr::unchecked("admin"),
                &InstantiateMsg::default(),
                &[],
                "did-registry",
                None,
            )
            .unwrap();
        Suite { app, contract }
    }

    /// Owner's DID with three active guardians
    fn with_guardians() -> Self {
        let mut suite = Suite::new();
        suite.create_did(DID, OWNER);
        for guardian in GUARDIANS {
            suite
                .exec(
                    OWNER,
                    ExecuteMsg::AddGuardian {
                        did_id: DID.to_string(),
                        guardian_address: guardian.to_string(),
                        public_key: format!("pk-{}", guardian),
                    },
                )
                .unwrap();
        }
        suite
    }

    fn exec(&mut self, sender: &str, msg: ExecuteMsg) -> Result<AppResponse, ContractError> {
        self.app
            .execute_contract(Addr::unchecked(sender), self.contract.clone(), &msg, &[])
            .map_err(|err| err.downcast::<ContractError>().unwrap())
    }

    fn query<T: DeserializeOwned>(&self, msg: QueryMsg) -> T {
        self.app
            .wrap()
            .query_wasm_smart(self.contract.clone(), &msg)
            .unwrap()
    }

    fn advance(&mut self, seconds: u64) {
        self.app.update_block(|block| {
            block.time = block.time.plus_seconds(seconds);
            block.height += 1;
        });
    }

    fn create_did(&mut self, id: &str, owner: &str) {
        self.exec(
            owner,
            ExecuteMsg::CreateDid {
                id: id.to_string(),
                document: payload(owner),
            },
        )
        .unwrap();
    }

    fn document(&self) -> DocumentResponse {
        self.query(QueryMsg::GetDocument {
            id: DID.to_string(),
        })
    }

    fn proposal(&self, id: u64) -> ProposalResponse {
        self.query(QueryMsg::GetProposal { proposal_id: id })
    }

    fn propose(&mut self, proposer: &str, ttl: Option<u64>) -> u64 {
        let res = self
            .exec(
                proposer,
                ExecuteMsg::ProposeRecovery {
                    did_id: DID.to_string(),
                    new_controller: NEW_OWNER.to_string(),
                    reason: "controller key lost".to_string(),
                    ttl_seconds: ttl,
                },
            )
            .unwrap();
        res.events
            .iter()
            .flat_map(|event| event.attributes.iter())
            .find(|attr| attr.key == "proposal_id")
            .unwrap()
            .value
            .parse()
            .unwrap()
    }

    fn approve(&mut self, guardian: &str, id: u64) -> Result<AppResponse, ContractError> {
        self.exec(guardian, ExecuteMsg::ApproveRecovery { proposal_id: id })
    }

    fn reject(&mut self, guardian: &str, id: u64) -> Result<AppResponse, ContractError> {
        self.exec(
            guardian,
            ExecuteMsg::RejectRecovery {
                proposal_id: id,
                reason: Some("not convinced".to_string()),
            },
        )
    }

    fn invariants(&self) -> InvariantsResponse {
        self.query(QueryMsg::CheckInvariants {})
    }
}

fn payload(owner: &str) -> DocumentPayload {
    DocumentPayload {
        context: vec!["https://www.w3.org/ns/did/v1".to_string()],
        verification_method: vec![VerificationMethodInput {
            id: format!("{}#key-1", DID),
            method_type: "Ed25519VerificationKey2020".to_string(),
            controller: owner.to_string(),
            public_key_multibase: Some(
                "z6MkpTHR8VNsBxYAAWHut2Geadd9jSwuBV8xRoAnwWsdvktH".to_string(),
            ),
            public_key_jwk: None,
            security_level: None,
            hsm_backed: false,
            expires_at: None,
        }],
        authentication: vec![format!("{}#key-1", DID)],
        organization_id: Some("acme".to_string()),
        ..DocumentPayload::default()
    }
}

#[test]
fn version_conflict_then_update_keeps_history() {
    let mut suite = Suite::new();
    suite.create_did(DID, OWNER);
    assert_eq!(1, suite.document().document.version);

    let err = suite
        .exec(
            OWNER,
            ExecuteMsg::UpdateDid {
                id: DID.to_string(),
                version: 1,
                document: payload(OWNER),
            },
        )
        .unwrap_err();
    assert_eq!(
        ContractError::VersionConflict {
            current: 1,
            proposed: 1
        },
        err
    );
    assert_eq!(ErrorKind::Conflict, err.kind());

    let mut next = payload(OWNER);
    next.tags = vec!["rotated".to_string()];
    suite
        .exec(
            OWNER,
            ExecuteMsg::UpdateDid {
                id: DID.to_string(),
                version: 2,
                document: next,
            },
        )
        .unwrap();

    let current = suite.document().document;
    assert_eq!(2, current.version);
    assert_eq!(vec!["rotated".to_string()], current.metadata.tags);

    let old: DocumentResponse = suite.query(QueryMsg::GetDocumentVersion {
        id: DID.to_string(),
        version: 1,
    });
    assert_eq!(1, old.document.version);
    assert!(old.document.metadata.tags.is_empty());
}

#[test]
fn majority_approval_then_execution_transfers_control() {
    let mut suite = Suite::with_guardians();
    let id = suite.propose("guardian1", None);

    suite.approve("guardian1", id).unwrap();
    assert_eq!(ProposalStatus::Pending, suite.proposal(id).status);

    suite.approve("guardian2", id).unwrap();
    let proposal = suite.proposal(id);
    assert_eq!(ProposalStatus::Approved, proposal.status);
    assert_eq!(2, proposal.threshold);

    suite
        .exec("guardian3", ExecuteMsg::ExecuteRecovery { proposal_id: id })
        .unwrap();

    let proposal = suite.proposal(id);
    assert_eq!(ProposalStatus::Executed, proposal.status);
    assert!(proposal.proposal.executed_at.is_some());

    let doc = suite.document().document;
    assert_eq!(vec![NEW_OWNER.to_string()], doc.controller);
    assert_eq!(Addr::unchecked(NEW_OWNER), doc.creator);
    assert_eq!(2, doc.version);
    assert!(doc.verification_method[0].revoked);

    // the old owner is locked out, the new one is in
    let err = suite
        .exec(OWNER, ExecuteMsg::DeactivateDid { id: DID.to_string() })
        .unwrap_err();
    assert_eq!(ContractError::Unauthorized {}, err);
    suite
        .exec(
            NEW_OWNER,
            ExecuteMsg::UpdateDid {
                id: DID.to_string(),
                version: 3,
                document: payload(NEW_OWNER),
            },
        )
        .unwrap();

    let log: AuditLogResponse = suite.query(QueryMsg::GetProposalAuditLog {
        proposal_id: id,
        limit: None,
    });
    let actions: Vec<_> = log.entries.iter().map(|e| e.action).collect();
    assert_eq!(
        vec![
            AuditAction::RecoveryProposed,
            AuditAction::RecoveryApproved,
            AuditAction::RecoveryApproved,
            AuditAction::RecoveryExecuted,
        ],
        actions
    );
    let did_log: AuditLogResponse = suite.query(QueryMsg::GetAuditLog {
        did_id: DID.to_string(),
        start_after: None,
        limit: Some(0),
    });
    let executed = did_log
        .entries
        .iter()
        .filter(|e| e.action == AuditAction::RecoveryExecuted)
        .count();
    assert_eq!(2, executed);

    assert!(!suite.invariants().broken);
}

#[test]
fn two_rejections_make_threshold_unreachable() {
    let mut suite = Suite::with_guardians();
    let id = suite.propose("guardian1", None);

    suite.reject("guardian1", id).unwrap();
    assert_eq!(ProposalStatus::Pending, suite.proposal(id).status);
    suite.reject("guardian2", id).unwrap();
    assert_eq!(ProposalStatus::Rejected, suite.proposal(id).status);

    let err = suite.approve("guardian3", id).unwrap_err();
    assert!(matches!(err, ContractError::InvalidProposalStatus { .. }));
    assert_eq!(ErrorKind::State, err.kind());

    let err = suite
        .exec("guardian3", ExecuteMsg::ExecuteRecovery { proposal_id: id })
        .unwrap_err();
    assert!(matches!(err, ContractError::InvalidProposalStatus { .. }));
    assert_eq!(vec![OWNER.to_string()], suite.document().document.controller);
}

#[test]
fn late_vote_fails_and_touch_expires() {
    let mut suite = Suite::with_guardians();
    let id = suite.propose("guardian1", Some(60));
    suite.approve("guardian1", id).unwrap();

    suite.advance(61);
    let err = suite.approve("guardian3", id).unwrap_err();
    assert!(matches!(err, ContractError::ProposalExpired { .. }));
    assert_eq!(ErrorKind::Temporal, err.kind());

    // stored status is untouched by the failed vote, the clock says expired
    let proposal = suite.proposal(id);
    assert_eq!(ProposalStatus::Pending, proposal.status);
    assert_eq!(ProposalStatus::Expired, proposal.effective_status);
    assert_eq!(1, proposal.proposal.approvals.len());
    assert!(suite.invariants().broken);

    suite
        .exec("anyone", ExecuteMsg::ExpireProposal { proposal_id: id })
        .unwrap();
    let proposal = suite.proposal(id);
    assert_eq!(ProposalStatus::Expired, proposal.status);
    assert!(!suite.invariants().broken);

    let err = suite
        .exec("guardian2", ExecuteMsg::ExecuteRecovery { proposal_id: id })
        .unwrap_err();
    assert!(matches!(err, ContractError::ProposalExpired { .. }));
}

#[test]
fn removed_guardian_vote_stops_counting() {
    let mut suite = Suite::with_guardians();
    let id = suite.propose("guardian1", None);
    suite.approve("guardian1", id).unwrap();

    suite
        .exec(
            OWNER,
            ExecuteMsg::RemoveGuardian {
                did_id: DID.to_string(),
                guardian_address: "guardian1".to_string(),
            },
        )
        .unwrap();
    let proposal = suite.proposal(id);
    assert_eq!(2, proposal.active_guardians);
    assert_eq!(2, proposal.threshold);

    // with the creation-time set (3 guardians) two approvals would pass;
    // against the current set only guardian2 counts
    suite.approve("guardian2", id).unwrap();
    let proposal = suite.proposal(id);
    assert_eq!(ProposalStatus::Pending, proposal.status);
    assert_eq!(2, proposal.proposal.approvals.len());

    let err = suite.approve("guardian1", id).unwrap_err();
    assert!(matches!(err, ContractError::NotAGuardian { .. }));

    suite.approve("guardian3", id).unwrap();
    assert_eq!(ProposalStatus::Approved, suite.proposal(id).status);

    let guardians: GuardiansResponse = suite.query(QueryMsg::GetGuardians {
        did_id: DID.to_string(),
    });
    assert_eq!(3, guardians.guardians.len());
    assert!(!suite.invariants().broken);
}

#[test]
fn added_guardians_reopen_an_approved_proposal() {
    let mut suite = Suite::with_guardians();
    let id = suite.propose("guardian1", None);
    suite.approve("guardian1", id).unwrap();
    suite.approve("guardian2", id).unwrap();
    assert_eq!(ProposalStatus::Approved, suite.proposal(id).status);

    for guardian in ["guardian4", "guardian5", "guardian6"] {
        suite
            .exec(
                OWNER,
                ExecuteMsg::AddGuardian {
                    did_id: DID.to_string(),
                    guardian_address: guardian.to_string(),
                    public_key: format!("pk-{}", guardian),
                },
            )
            .unwrap();
    }

    // two of six no longer carry the proposal
    let proposal = suite.proposal(id);
    assert_eq!(ProposalStatus::Pending, proposal.status);
    assert_eq!(6, proposal.active_guardians);
    assert_eq!(4, proposal.threshold);
    assert!(!suite.invariants().broken);

    let err = suite
        .exec("guardian3", ExecuteMsg::ExecuteRecovery { proposal_id: id })
        .unwrap_err();
    assert!(matches!(err, ContractError::InvalidProposalStatus { .. }));
    assert_eq!(vec![OWNER.to_string()], suite.document().document.controller);

    let log: AuditLogResponse = suite.query(QueryMsg::GetProposalAuditLog {
        proposal_id: id,
        limit: None,
    });
    assert_eq!(AuditAction::RecoveryRetallied, log.entries.last().unwrap().action);

    suite.approve("guardian3", id).unwrap();
    suite.approve("guardian4", id).unwrap();
    assert_eq!(ProposalStatus::Approved, suite.proposal(id).status);
    suite
        .exec("guardian5", ExecuteMsg::ExecuteRecovery { proposal_id: id })
        .unwrap();
    assert_eq!(vec![NEW_OWNER.to_string()], suite.document().document.controller);
    assert!(!suite.invariants().broken);
}

#[test]
fn removing_the_last_undecided_guardian_settles_a_split_vote() {
    let mut suite = Suite::with_guardians();
    let id = suite.propose("guardian1", None);
    suite.approve("guardian1", id).unwrap();
    suite.reject("guardian2", id).unwrap();
    assert_eq!(ProposalStatus::Pending, suite.proposal(id).status);

    suite
        .exec(
            OWNER,
            ExecuteMsg::RemoveGuardian {
                did_id: DID.to_string(),
                guardian_address: "guardian3".to_string(),
            },
        )
        .unwrap();

    // one approval, one rejection, nobody left to vote
    let proposal = suite.proposal(id);
    assert_eq!(ProposalStatus::Rejected, proposal.status);
    assert_eq!(2, proposal.threshold);
    let pending: ProposalsResponse = suite.query(QueryMsg::GetPendingProposals {
        start_after: None,
        limit: None,
    });
    assert!(pending.proposals.is_empty());
    assert!(!suite.invariants().broken);
}

#[test]
fn failed_execution_leaves_no_trace() {
    let mut suite = Suite::with_guardians();
    let id = suite.propose("guardian1", None);
    suite.approve("guardian1", id).unwrap();
    suite.approve("guardian2", id).unwrap();

    suite
        .exec(
            OWNER,
            ExecuteMsg::TransitionState {
                id: DID.to_string(),
                new_state: DidState::Revoked,
                reason: "retired".to_string(),
            },
        )
        .unwrap();

    let before: AuditLogResponse = suite.query(QueryMsg::GetAuditLog {
        did_id: DID.to_string(),
        start_after: None,
        limit: None,
    });
    let err = suite
        .exec("guardian3", ExecuteMsg::ExecuteRecovery { proposal_id: id })
        .unwrap_err();
    assert!(matches!(err, ContractError::DidNotOperable { .. }));

    let after: AuditLogResponse = suite.query(QueryMsg::GetAuditLog {
        did_id: DID.to_string(),
        start_after: None,
        limit: None,
    });
    assert_eq!(before.entries.len(), after.entries.len());
    assert_eq!(ProposalStatus::Approved, suite.proposal(id).status);
    assert_eq!(DidState::Revoked, suite.document().document.status.state);
}

#[test]
fn end_block_sweeps_overdue_proposals() {
    let mut suite = Suite::with_guardians();
    let first = suite.propose("guardian1", Some(100));
    let second = suite.propose("guardian2", Some(500));

    suite.advance(101);
    let res = suite
        .app
        .wasm_sudo(suite.contract.clone(), &SudoMsg::EndBlock {})
        .unwrap();
    let swept: SweepResponse = from_json(res.data.unwrap()).unwrap();
    assert_eq!(vec![first], swept.expired);
    assert_eq!(ProposalStatus::Expired, suite.proposal(first).status);
    assert_eq!(ProposalStatus::Pending, suite.proposal(second).status);

    suite.advance(400);
    let res = suite
        .exec("anyone", ExecuteMsg::SweepExpiredProposals { limit: None })
        .unwrap();
    let swept: SweepResponse = from_json(res.data.unwrap()).unwrap();
    assert_eq!(vec![second], swept.expired);
    assert!(!suite.invariants().broken);
}

#[test]
fn resolve_is_audited() {
    let mut suite = Suite::new();
    suite.create_did(DID, OWNER);

    let res = suite
        .exec("bob", ExecuteMsg::ResolveDid { id: DID.to_string() })
        .unwrap();
    let resolved: DocumentResponse = from_json(res.data.unwrap()).unwrap();
    assert_eq!(DID, resolved.document.id);

    let log: AuditLogResponse = suite.query(QueryMsg::GetAuditLog {
        did_id: DID.to_string(),
        start_after: None,
        limit: None,
    });
    let last = log.entries.last().unwrap();
    assert_eq!(AuditAction::DocumentAccessed, last.action);
    assert_eq!(Addr::unchecked("bob"), last.actor);
}
