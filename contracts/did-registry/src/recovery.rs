use cosmwasm_std::{
    to_json_binary, Addr, Deps, DepsMut, Env, MessageInfo, Order, Response, StdResult, Storage,
};
use cw_storage_plus::Bound;
use shared::{is_expired, majority_threshold, BlockContext};

use crate::audit;
use crate::contract::{validate_address, validate_signer};
use crate::document::{apply_recovery, load_document};
use crate::error::ContractError;
use crate::guardian::{active_guardians, is_active_guardian};
use crate::msg::{ProposalResponse, ProposalsResponse, SignatureSharesResponse, SweepResponse};
use crate::state::{
    page_limit, AuditAction, DidState, ProposalStatus, RecoveryProposal, SignatureShare, CONFIG,
    NEXT_PROPOSAL_ID, PENDING_PROPOSALS, PROPOSALS, PROPOSALS_BY_DID, SIGNATURE_SHARES,
};

pub const DEFAULT_SWEEP_LIMIT: u32 = 50;
pub const END_BLOCK_SWEEP_LIMIT: u32 = 100;

/// Votes counted against the current active guardian set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub active: u64,
    pub threshold: u64,
    pub approvals: u64,
    pub rejections: u64,
}

impl Tally {
    /// Votes from guardians that are no longer active stay on the proposal but
    /// do not count.
    pub fn new(proposal: &RecoveryProposal, active: &[Addr]) -> Self {
        let count = |voters: &[Addr]| voters.iter().filter(|v| active.contains(v)).count() as u64;
        let active_count = active.len() as u64;
        Tally {
            active: active_count,
            threshold: majority_threshold(active_count),
            approvals: count(&proposal.approvals),
            rejections: count(&proposal.rejections),
        }
    }

    /// Active guardians that have not voted
    pub fn remaining(&self) -> u64 {
        self.active
            .saturating_sub(self.approvals)
            .saturating_sub(self.rejections)
    }

    pub fn status(&self) -> ProposalStatus {
        if self.approvals >= self.threshold {
            ProposalStatus::Approved
        } else if self.rejections >= self.threshold
            || self.approvals + self.remaining() < self.threshold
        {
            ProposalStatus::Rejected
        } else {
            ProposalStatus::Pending
        }
    }
}

pub fn load_proposal(storage: &dyn Storage, id: u64) -> Result<RecoveryProposal, ContractError> {
    PROPOSALS
        .may_load(storage, id)?
        .ok_or(ContractError::ProposalNotFound { id })
}

fn ensure_not_expired(proposal: &RecoveryProposal, now: u64) -> Result<(), ContractError> {
    if is_expired(now, proposal.expires_at) {
        return Err(ContractError::ProposalExpired {
            id: proposal.id,
            expires_at: proposal.expires_at,
        });
    }
    Ok(())
}

fn ensure_status(
    proposal: &RecoveryProposal,
    allowed: &[ProposalStatus],
) -> Result<(), ContractError> {
    if !allowed.contains(&proposal.status) {
        return Err(ContractError::InvalidProposalStatus {
            status: proposal.status.to_string(),
            expected: allowed
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" or "),
        });
    }
    Ok(())
}

fn ensure_guardian(
    storage: &dyn Storage,
    did_id: &str,
    signer: &Addr,
) -> Result<(), ContractError> {
    if !is_active_guardian(storage, did_id, signer)? {
        return Err(ContractError::NotAGuardian {
            did_id: did_id.to_string(),
        });
    }
    Ok(())
}

pub fn execute_propose_recovery(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    did_id: String,
    new_controller: String,
    reason: String,
    ttl_seconds: Option<u64>,
) -> Result<Response, ContractError> {
    let proposer = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);
    let new_controller = validate_address(deps.api, "new_controller", &new_controller)?;
    if reason.trim().is_empty() {
        return Err(ContractError::EmptyField {
            field: "reason".to_string(),
        });
    }

    // A revoked DID cannot be recovered
    let doc = load_document(deps.storage, &did_id)?;
    if doc.state() == DidState::Revoked {
        return Err(ContractError::DidNotOperable {
            state: doc.state().to_string(),
        });
    }
    ensure_guardian(deps.storage, &did_id, &proposer)?;

    // Check proposal lifetime
    let config = CONFIG.load(deps.storage)?;
    let ttl = ttl_seconds.unwrap_or(config.default_proposal_ttl);
    if ttl == 0 || ttl > config.max_proposal_ttl {
        return Err(ContractError::InvalidTtl {
            ttl,
            max: config.max_proposal_ttl,
        });
    }
    if doc.controller == [new_controller.to_string()] {
        return Err(ContractError::SameController { did_id });
    }

    let id = NEXT_PROPOSAL_ID.may_load(deps.storage)?.unwrap_or(1);
    NEXT_PROPOSAL_ID.save(deps.storage, &(id + 1))?;

    let proposal = RecoveryProposal {
        id,
        did_id: did_id.clone(),
        proposer: proposer.clone(),
        new_controller: new_controller.clone(),
        reason: reason.clone(),
        status: ProposalStatus::Pending,
        approvals: vec![],
        rejections: vec![],
        created_at: ctx.now,
        expires_at: ctx.now + ttl,
        executed_at: None,
    };
    PROPOSALS.save(deps.storage, id, &proposal)?;
    PROPOSALS_BY_DID.save(deps.storage, (did_id.as_str(), id), &())?;
    PENDING_PROPOSALS.save(deps.storage, id, &())?;

    audit::record(
        deps.storage,
        &ctx,
        &proposer,
        &did_id,
        AuditAction::RecoveryProposed,
        Some(id),
        vec![
            ("new_controller", new_controller.to_string()),
            ("expires_at", proposal.expires_at.to_string()),
            ("reason", reason),
        ],
    )?;

    Ok(Response::new()
        .add_attribute("method", "propose_recovery")
        .add_attribute("proposal_id", id.to_string())
        .add_attribute("did_id", did_id)
        .add_attribute("expires_at", proposal.expires_at.to_string()))
}

pub fn execute_vote(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    proposal_id: u64,
    approve: bool,
    reason: Option<String>,
) -> Result<Response, ContractError> {
    let voter = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);

    // Expiry first, then status, then membership
    let mut proposal = load_proposal(deps.storage, proposal_id)?;
    ensure_not_expired(&proposal, ctx.now)?;
    ensure_status(&proposal, &[ProposalStatus::Pending])?;
    ensure_guardian(deps.storage, &proposal.did_id, &voter)?;

    // Check for a vote already cast either way
    let (opposing, target) = if approve {
        (proposal.has_rejected(&voter), proposal.has_approved(&voter))
    } else {
        (proposal.has_approved(&voter), proposal.has_rejected(&voter))
    };
    if opposing {
        return Err(ContractError::ConflictingVote {});
    }
    if target {
        return Err(ContractError::AlreadyVoted {});
    }
    if approve {
        proposal.approvals.push(voter.clone());
    } else {
        proposal.rejections.push(voter.clone());
    }

    // Re-derive status from the current guardian set
    let tally = Tally::new(&proposal, &active_guardians(deps.storage, &proposal.did_id)?);
    proposal.status = tally.status();
    PROPOSALS.save(deps.storage, proposal_id, &proposal)?;
    if proposal.status != ProposalStatus::Pending {
        PENDING_PROPOSALS.remove(deps.storage, proposal_id);
    }

    let (action, method) = if approve {
        (AuditAction::RecoveryApproved, "approve_recovery")
    } else {
        (AuditAction::RecoveryRejected, "reject_recovery")
    };
    let mut data = vec![
        ("status", proposal.status.to_string()),
        ("approvals", tally.approvals.to_string()),
        ("rejections", tally.rejections.to_string()),
        ("threshold", tally.threshold.to_string()),
    ];
    if let Some(reason) = reason {
        data.push(("reason", reason));
    }
    audit::record(
        deps.storage,
        &ctx,
        &voter,
        &proposal.did_id,
        action,
        Some(proposal_id),
        data,
    )?;

    Ok(Response::new()
        .add_attribute("method", method)
        .add_attribute("proposal_id", proposal_id.to_string())
        .add_attribute("voter", voter)
        .add_attribute("status", proposal.status.as_str()))
}

pub fn execute_execute_recovery(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    proposal_id: u64,
) -> Result<Response, ContractError> {
    let executor = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);

    let mut proposal = load_proposal(deps.storage, proposal_id)?;
    ensure_not_expired(&proposal, ctx.now)?;
    ensure_status(&proposal, &[ProposalStatus::Approved])?;
    ensure_guardian(deps.storage, &proposal.did_id, &executor)?;

    // Approval must still hold against the current guardian set
    let tally = Tally::new(&proposal, &active_guardians(deps.storage, &proposal.did_id)?);
    if tally.status() != ProposalStatus::Approved {
        return Err(ContractError::InvalidProposalStatus {
            status: tally.status().to_string(),
            expected: ProposalStatus::Approved.to_string(),
        });
    }

    let (doc, revoked) = apply_recovery(
        deps.storage,
        &ctx,
        &proposal.did_id,
        &proposal.new_controller,
    )?;

    proposal.status = ProposalStatus::Executed;
    proposal.executed_at = Some(ctx.now);
    PROPOSALS.save(deps.storage, proposal_id, &proposal)?;

    audit::record(
        deps.storage,
        &ctx,
        &executor,
        &proposal.did_id,
        AuditAction::RecoveryExecuted,
        None,
        vec![
            ("proposal_id", proposal_id.to_string()),
            ("new_controller", proposal.new_controller.to_string()),
            ("version", doc.version.to_string()),
            ("revoked_methods", revoked.join(",")),
        ],
    )?;
    audit::record(
        deps.storage,
        &ctx,
        &executor,
        &proposal.did_id,
        AuditAction::RecoveryExecuted,
        Some(proposal_id),
        vec![("status", proposal.status.to_string())],
    )?;

    Ok(Response::new()
        .add_attribute("method", "execute_recovery")
        .add_attribute("proposal_id", proposal_id.to_string())
        .add_attribute("did_id", proposal.did_id)
        .add_attribute("new_controller", proposal.new_controller)
        .add_attribute("version", doc.version.to_string()))
}

fn expire(
    storage: &mut dyn Storage,
    ctx: &BlockContext,
    actor: &Addr,
    mut proposal: RecoveryProposal,
) -> StdResult<()> {
    proposal.status = ProposalStatus::Expired;
    PROPOSALS.save(storage, proposal.id, &proposal)?;
    PENDING_PROPOSALS.remove(storage, proposal.id);
    audit::record(
        storage,
        ctx,
        actor,
        &proposal.did_id,
        AuditAction::RecoveryExpired,
        Some(proposal.id),
        vec![("expires_at", proposal.expires_at.to_string())],
    )?;
    Ok(())
}

/// Re-derives every open proposal on `did_id` after its guardian set changed.
/// A proposal that would fall back to pending after its deadline is expired
/// instead. Returns the ids whose stored status moved.
pub fn retally_open_proposals(
    storage: &mut dyn Storage,
    ctx: &BlockContext,
    actor: &Addr,
    did_id: &str,
) -> StdResult<Vec<u64>> {
    let ids = PROPOSALS_BY_DID
        .prefix(did_id)
        .keys(storage, None, None, Order::Ascending)
        .collect::<StdResult<Vec<_>>>()?;
    let active = active_guardians(storage, did_id)?;

    let mut changed = vec![];
    for id in ids {
        let mut proposal = PROPOSALS.load(storage, id)?;
        if !matches!(proposal.status, ProposalStatus::Pending | ProposalStatus::Approved) {
            continue;
        }

        let tally = Tally::new(&proposal, &active);
        let status = tally.status();
        if status == ProposalStatus::Pending && is_expired(ctx.now, proposal.expires_at) {
            expire(storage, ctx, actor, proposal)?;
            changed.push(id);
            continue;
        }
        if status == proposal.status {
            continue;
        }

        let from = proposal.status;
        proposal.status = status;
        PROPOSALS.save(storage, id, &proposal)?;
        if status == ProposalStatus::Pending {
            PENDING_PROPOSALS.save(storage, id, &())?;
        } else {
            PENDING_PROPOSALS.remove(storage, id);
        }
        audit::record(
            storage,
            ctx,
            actor,
            did_id,
            AuditAction::RecoveryRetallied,
            Some(id),
            vec![
                ("from", from.to_string()),
                ("status", status.to_string()),
                ("approvals", tally.approvals.to_string()),
                ("rejections", tally.rejections.to_string()),
                ("threshold", tally.threshold.to_string()),
            ],
        )?;
        changed.push(id);
    }
    Ok(changed)
}

pub fn execute_expire_proposal(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    proposal_id: u64,
) -> Result<Response, ContractError> {
    let actor = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);

    let proposal = load_proposal(deps.storage, proposal_id)?;
    ensure_status(&proposal, &[ProposalStatus::Pending])?;
    if !is_expired(ctx.now, proposal.expires_at) {
        return Err(ContractError::ProposalNotExpired {
            id: proposal_id,
            expires_at: proposal.expires_at,
        });
    }
    expire(deps.storage, &ctx, &actor, proposal)?;

    Ok(Response::new()
        .add_attribute("method", "expire_proposal")
        .add_attribute("proposal_id", proposal_id.to_string())
        .add_attribute("status", ProposalStatus::Expired.as_str()))
}

/// Expires overdue pending proposals in id order, at most `limit` of them
pub fn sweep_expired(
    storage: &mut dyn Storage,
    ctx: &BlockContext,
    actor: &Addr,
    limit: u32,
) -> StdResult<Vec<u64>> {
    let mut overdue = vec![];
    for id in PENDING_PROPOSALS.keys(storage, None, None, Order::Ascending) {
        if overdue.len() >= limit as usize {
            break;
        }
        let proposal = PROPOSALS.load(storage, id?)?;
        if is_expired(ctx.now, proposal.expires_at) {
            overdue.push(proposal);
        }
    }

    let mut expired = Vec::with_capacity(overdue.len());
    for proposal in overdue {
        expired.push(proposal.id);
        expire(storage, ctx, actor, proposal)?;
    }
    Ok(expired)
}

pub fn execute_sweep_expired(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    limit: Option<u32>,
) -> Result<Response, ContractError> {
    let actor = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);
    let expired = sweep_expired(
        deps.storage,
        &ctx,
        &actor,
        limit.unwrap_or(DEFAULT_SWEEP_LIMIT),
    )?;

    Ok(Response::new()
        .add_attribute("method", "sweep_expired_proposals")
        .add_attribute("expired", expired.len().to_string())
        .set_data(to_json_binary(&SweepResponse { expired })?))
}

pub fn execute_submit_signature_share(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    proposal_id: u64,
    signature_share: String,
    public_key_share: String,
) -> Result<Response, ContractError> {
    let signer = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);

    let proposal = load_proposal(deps.storage, proposal_id)?;
    ensure_not_expired(&proposal, ctx.now)?;
    ensure_status(
        &proposal,
        &[ProposalStatus::Pending, ProposalStatus::Approved],
    )?;
    ensure_guardian(deps.storage, &proposal.did_id, &signer)?;
    for (field, value) in [
        ("signature_share", &signature_share),
        ("public_key_share", &public_key_share),
    ] {
        if value.trim().is_empty() {
            return Err(ContractError::EmptyField {
                field: field.to_string(),
            });
        }
    }
    if SIGNATURE_SHARES.has(deps.storage, (proposal_id, &signer)) {
        return Err(ContractError::DuplicateSignatureShare {});
    }

    let share = SignatureShare {
        proposal_id,
        signer: signer.clone(),
        signature_share,
        public_key_share,
        signed_at: ctx.now,
    };
    SIGNATURE_SHARES.save(deps.storage, (proposal_id, &signer), &share)?;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &proposal.did_id,
        AuditAction::SignatureShareSubmitted,
        Some(proposal_id),
        vec![],
    )?;

    Ok(Response::new()
        .add_attribute("method", "submit_signature_share")
        .add_attribute("proposal_id", proposal_id.to_string())
        .add_attribute("signer", signer))
}

// Queries

fn proposal_response(
    storage: &dyn Storage,
    now: u64,
    proposal: RecoveryProposal,
) -> StdResult<ProposalResponse> {
    let tally = Tally::new(&proposal, &active_guardians(storage, &proposal.did_id)?);
    Ok(ProposalResponse {
        status: proposal.status,
        effective_status: proposal.effective_status(now),
        active_guardians: tally.active,
        threshold: tally.threshold,
        proposal,
    })
}

pub fn query_proposal(deps: Deps, env: Env, proposal_id: u64) -> StdResult<ProposalResponse> {
    let proposal = PROPOSALS.load(deps.storage, proposal_id)?;
    proposal_response(deps.storage, env.block.time.seconds(), proposal)
}

pub fn query_proposals_by_did(
    deps: Deps,
    env: Env,
    did_id: String,
    start_after: Option<u64>,
    limit: Option<u32>,
) -> StdResult<ProposalsResponse> {
    let now = env.block.time.seconds();
    let start = start_after.map(Bound::exclusive);
    let proposals = PROPOSALS_BY_DID
        .prefix(did_id.as_str())
        .keys(deps.storage, start, None, Order::Ascending)
        .take(page_limit(limit))
        .map(|id| proposal_response(deps.storage, now, PROPOSALS.load(deps.storage, id?)?))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(ProposalsResponse { proposals })
}

pub fn query_pending_proposals(
    deps: Deps,
    env: Env,
    start_after: Option<u64>,
    limit: Option<u32>,
) -> StdResult<ProposalsResponse> {
    let now = env.block.time.seconds();
    let start = start_after.map(Bound::exclusive);
    let proposals = PENDING_PROPOSALS
        .keys(deps.storage, start, None, Order::Ascending)
        .take(page_limit(limit))
        .map(|id| proposal_response(deps.storage, now, PROPOSALS.load(deps.storage, id?)?))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(ProposalsResponse { proposals })
}

pub fn query_signature_shares(deps: Deps, proposal_id: u64) -> StdResult<SignatureSharesResponse> {
    let shares = SIGNATURE_SHARES
        .prefix(proposal_id)
        .range(deps.storage, None, None, Order::Ascending)
        .map(|item| item.map(|(_, share)| share))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(SignatureSharesResponse { shares })
}
