use std::collections::HashSet;

use cosmwasm_std::{Addr, Deps, Order, StdResult};
use shared::is_expired;

use crate::guardian::{active_guardians, is_active_guardian};
use crate::msg::{InvariantReport, InvariantsResponse};
use crate::recovery::Tally;
use crate::state::{
    DidDocument, ProposalStatus, DIDS_BY_ORGANIZATION, DIDS_BY_STATE, DOCUMENTS,
    DOCUMENT_VERSIONS, GUARDED_DIDS, GUARDIANS, METADATA, PENDING_PROPOSALS, PROPOSALS,
};

pub const DOCUMENT_CONSISTENCY: &str = "document-consistency";
pub const GUARDIAN_CONSISTENCY: &str = "guardian-consistency";
pub const GUARDIAN_INDEX: &str = "guardian-index";
pub const PROPOSAL_LOGIC: &str = "proposal-logic";
pub const THRESHOLD_AGREEMENT: &str = "threshold-agreement";
pub const PROPOSAL_CLOCK: &str = "proposal-clock";

fn report(name: &str, violations: Vec<String>) -> InvariantReport {
    InvariantReport {
        name: name.to_string(),
        broken: !violations.is_empty(),
        violations,
    }
}

fn valid_addr(deps: Deps, addr: &str) -> bool {
    !addr.is_empty() && deps.api.addr_validate(addr).is_ok()
}

fn documents(deps: Deps) -> StdResult<Vec<DidDocument>> {
    DOCUMENTS
        .range(deps.storage, None, None, Order::Ascending)
        .map(|item| item.map(|(_, doc)| doc))
        .collect()
}

pub fn document_consistency(deps: Deps) -> StdResult<InvariantReport> {
    let mut violations = vec![];
    for doc in documents(deps)? {
        let id = doc.id.as_str();
        if id.is_empty() || doc.context.is_empty() {
            violations.push(format!("{}: empty id or context", id));
        }
        if !valid_addr(deps, doc.creator.as_str()) {
            violations.push(format!("{}: invalid creator {}", id, doc.creator));
        }
        for controller in &doc.controller {
            if !valid_addr(deps, controller) {
                violations.push(format!("{}: invalid controller {}", id, controller));
            }
        }
        if doc.version == 0 {
            violations.push(format!("{}: version 0", id));
        }
        if doc.updated_at < doc.created_at {
            violations.push(format!("{}: updated before created", id));
        }
        if doc.metadata.version_id != doc.version.to_string() {
            violations.push(format!(
                "{}: versionId {} does not match version {}",
                id, doc.metadata.version_id, doc.version
            ));
        }

        match DOCUMENTS.may_load(deps.storage, id)? {
            Some(loaded) if loaded == doc => {}
            _ => violations.push(format!("{}: does not round-trip through storage", id)),
        }

        for item in DOCUMENT_VERSIONS
            .prefix(id)
            .range(deps.storage, None, None, Order::Ascending)
        {
            let (version, snapshot) = item?;
            if snapshot.version != version || version >= doc.version {
                violations.push(format!(
                    "{}: archived slot {} holds version {} (current {})",
                    id, version, snapshot.version, doc.version
                ));
            }
        }

        match METADATA.may_load(deps.storage, id)? {
            None => violations.push(format!("{}: missing metadata entry", id)),
            Some(meta) => {
                if meta.version != doc.version
                    || meta.state != doc.state()
                    || meta.organization_id != doc.metadata.organization_id
                {
                    violations.push(format!("{}: metadata entry is stale", id));
                }
            }
        }
        if !DIDS_BY_STATE.has(deps.storage, (doc.state().as_str(), id)) {
            violations.push(format!("{}: missing state index", id));
        }
        if let Some(org) = &doc.metadata.organization_id {
            if !DIDS_BY_ORGANIZATION.has(deps.storage, (org.as_str(), id)) {
                violations.push(format!("{}: missing organization index", id));
            }
        }
    }
    Ok(report(DOCUMENT_CONSISTENCY, violations))
}

pub fn guardian_consistency(deps: Deps) -> StdResult<InvariantReport> {
    let mut violations = vec![];
    for item in GUARDIANS.range(deps.storage, None, None, Order::Ascending) {
        let ((did_id, addr), guardian) = item?;
        let label = format!("{}/{}", did_id, addr);
        if guardian.did_id != did_id || guardian.guardian_address != addr {
            violations.push(format!("{}: row does not match its key", label));
        }
        if guardian.public_key.is_empty() {
            violations.push(format!("{}: empty public key", label));
        }
        if !valid_addr(deps, addr.as_str()) {
            violations.push(format!("{}: invalid guardian address", label));
        }
        if guardian.added_at == 0 {
            violations.push(format!("{}: addedAt not set", label));
        }
        if !DOCUMENTS.has(deps.storage, &did_id) {
            violations.push(format!("{}: references a missing document", label));
        }
        if is_active_guardian(deps.storage, &did_id, &addr)? != guardian.active {
            violations.push(format!("{}: is_guardian disagrees with active flag", label));
        }
    }
    Ok(report(GUARDIAN_CONSISTENCY, violations))
}

pub fn guardian_index(deps: Deps) -> StdResult<InvariantReport> {
    let mut violations = vec![];
    for key in GUARDIANS.keys(deps.storage, None, None, Order::Ascending) {
        let (did_id, addr) = key?;
        if !GUARDED_DIDS.has(deps.storage, (&addr, did_id.as_str())) {
            violations.push(format!("{}/{}: missing reverse index", did_id, addr));
        }
    }
    for key in GUARDED_DIDS.keys(deps.storage, None, None, Order::Ascending) {
        let (addr, did_id) = key?;
        if !GUARDIANS.has(deps.storage, (did_id.as_str(), &addr)) {
            violations.push(format!("{}/{}: reverse index without a row", did_id, addr));
        }
    }
    Ok(report(GUARDIAN_INDEX, violations))
}

pub fn proposal_logic(deps: Deps, now: u64) -> StdResult<InvariantReport> {
    let mut violations = vec![];
    for item in PROPOSALS.range(deps.storage, None, None, Order::Ascending) {
        let (id, p) = item?;
        let label = format!("proposal {}", id);

        if p.did_id.is_empty() || p.reason.is_empty() {
            violations.push(format!("{}: empty did or reason", label));
        }
        for (field, addr) in [("proposer", &p.proposer), ("new controller", &p.new_controller)] {
            if !valid_addr(deps, addr.as_str()) {
                violations.push(format!("{}: invalid {} {}", label, field, addr));
            }
        }
        if p.expires_at <= p.created_at {
            violations.push(format!("{}: expires before it was created", label));
        }

        match (p.executed_at, p.status) {
            (Some(at), status) => {
                if at < p.created_at || at > p.expires_at {
                    violations.push(format!("{}: executed outside its window", label));
                }
                if !matches!(status, ProposalStatus::Approved | ProposalStatus::Executed) {
                    violations.push(format!("{}: executedAt set on a {} proposal", label, status));
                }
            }
            (None, ProposalStatus::Executed) => {
                violations.push(format!("{}: executed without executedAt", label));
            }
            _ => {}
        }
        if p.status == ProposalStatus::Expired && !is_expired(now, p.expires_at) {
            violations.push(format!("{}: expired before its deadline", label));
        }

        let mut seen: HashSet<&Addr> = HashSet::new();
        for voter in p.approvals.iter().chain(p.rejections.iter()) {
            if !seen.insert(voter) {
                violations.push(format!("{}: {} voted more than once", label, voter));
            }
            if !GUARDIANS.has(deps.storage, (p.did_id.as_str(), voter)) {
                violations.push(format!("{}: {} is not a guardian", label, voter));
            }
        }

        let indexed = PENDING_PROPOSALS.has(deps.storage, id);
        if indexed != (p.status == ProposalStatus::Pending) {
            violations.push(format!("{}: pending index disagrees with status {}", label, p.status));
        }
    }
    Ok(report(PROPOSAL_LOGIC, violations))
}

pub fn threshold_agreement(deps: Deps) -> StdResult<InvariantReport> {
    let mut violations = vec![];
    for item in PROPOSALS.range(deps.storage, None, None, Order::Ascending) {
        let (id, p) = item?;
        // Rejected is terminal, later membership changes do not reopen it
        if !matches!(p.status, ProposalStatus::Pending | ProposalStatus::Approved) {
            continue;
        }
        let tally = Tally::new(&p, &active_guardians(deps.storage, &p.did_id)?);
        if tally.status() != p.status {
            violations.push(format!(
                "proposal {}: stored {} but {} of {} approvals and {} rejections imply {}",
                id,
                p.status,
                tally.approvals,
                tally.threshold,
                tally.rejections,
                tally.status()
            ));
        }
    }
    Ok(report(THRESHOLD_AGREEMENT, violations))
}

pub fn proposal_clock(deps: Deps, now: u64) -> StdResult<InvariantReport> {
    let mut violations = vec![];
    for id in PENDING_PROPOSALS.keys(deps.storage, None, None, Order::Ascending) {
        let id = id?;
        let p = PROPOSALS.load(deps.storage, id)?;
        if p.status == ProposalStatus::Pending && is_expired(now, p.expires_at) {
            violations.push(format!(
                "proposal {}: pending past its deadline {}",
                id, p.expires_at
            ));
        }
    }
    Ok(report(PROPOSAL_CLOCK, violations))
}

/// Runs every check at `now`. Each one reports all its violations, not just the first.
pub fn check_all(deps: Deps, now: u64) -> StdResult<InvariantsResponse> {
    let reports = vec![
        document_consistency(deps)?,
        guardian_consistency(deps)?,
        guardian_index(deps)?,
        proposal_logic(deps, now)?,
        threshold_agreement(deps)?,
        proposal_clock(deps, now)?,
    ];
    Ok(InvariantsResponse {
        broken: reports.iter().any(|r| r.broken),
        reports,
    })
}
