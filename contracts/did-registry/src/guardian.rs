use cosmwasm_std::{Addr, Deps, DepsMut, Env, MessageInfo, Order, Response, StdResult, Storage};
use shared::{majority_threshold, BlockContext};

use crate::audit;
use crate::contract::{validate_address, validate_signer};
use crate::document::{authorize_controller, ensure_active, load_document};
use crate::error::ContractError;
use crate::msg::{
    ActiveGuardianCountResponse, GuardedDidsResponse, GuardiansResponse, IsGuardianResponse,
};
use crate::recovery::retally_open_proposals;
use crate::state::{AuditAction, Guardian, CONFIG, GUARDED_DIDS, GUARDIANS};

pub fn is_active_guardian(
    storage: &dyn Storage,
    did_id: &str,
    address: &Addr,
) -> StdResult<bool> {
    Ok(GUARDIANS
        .may_load(storage, (did_id, address))?
        .map_or(false, |g| g.active))
}

pub fn active_guardians(storage: &dyn Storage, did_id: &str) -> StdResult<Vec<Addr>> {
    GUARDIANS
        .prefix(did_id)
        .range(storage, None, None, Order::Ascending)
        .filter_map(|item| match item {
            Ok((addr, guardian)) if guardian.active => Some(Ok(addr)),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
        .collect()
}

pub fn active_guardian_count(storage: &dyn Storage, did_id: &str) -> StdResult<u64> {
    Ok(active_guardians(storage, did_id)?.len() as u64)
}

pub fn execute_add_guardian(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    did_id: String,
    guardian_address: String,
    public_key: String,
) -> Result<Response, ContractError> {
    let signer = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);
    let guardian_addr = validate_address(deps.api, "guardian", &guardian_address)?;
    if public_key.trim().is_empty() {
        return Err(ContractError::EmptyField {
            field: "public_key".to_string(),
        });
    }

    // Guardians can only be added to an operable DID, by its controller
    let doc = load_document(deps.storage, &did_id)?;
    ensure_active(&doc)?;
    authorize_controller(&doc, &signer, ctx.now)?;
    if guardian_addr == signer {
        return Err(ContractError::SelfGuardian {});
    }

    // An inactive row is reactivated rather than duplicated
    let existing = GUARDIANS.may_load(deps.storage, (did_id.as_str(), &guardian_addr))?;
    if existing.as_ref().map_or(false, |g| g.active) {
        return Err(ContractError::DuplicateGuardian {
            did_id,
            guardian: guardian_addr.to_string(),
        });
    }
    let config = CONFIG.load(deps.storage)?;
    if active_guardian_count(deps.storage, &did_id)? >= u64::from(config.max_guardians) {
        return Err(ContractError::MaxGuardiansReached {
            max: config.max_guardians,
        });
    }

    let guardian = Guardian {
        did_id: did_id.clone(),
        guardian_address: guardian_addr.clone(),
        public_key,
        active: true,
        added_at: ctx.now,
    };
    GUARDIANS.save(deps.storage, (did_id.as_str(), &guardian_addr), &guardian)?;
    GUARDED_DIDS.save(deps.storage, (&guardian_addr, did_id.as_str()), &())?;

    // A larger set raises the threshold for proposals already in flight
    let retallied = retally_open_proposals(deps.storage, &ctx, &signer, &did_id)?;

    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &did_id,
        AuditAction::GuardianAdded,
        None,
        vec![
            ("guardian", guardian_addr.to_string()),
            ("reactivated", existing.is_some().to_string()),
        ],
    )?;

    Ok(Response::new()
        .add_attribute("method", "add_guardian")
        .add_attribute("did_id", did_id)
        .add_attribute("guardian", guardian_addr)
        .add_attribute("retallied", retallied.len().to_string()))
}

pub fn execute_remove_guardian(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    did_id: String,
    guardian_address: String,
) -> Result<Response, ContractError> {
    let signer = validate_signer(deps.api, &info)?;
    let ctx = BlockContext::from_env(&env);
    let guardian_addr = validate_address(deps.api, "guardian", &guardian_address)?;

    let doc = load_document(deps.storage, &did_id)?;
    authorize_controller(&doc, &signer, ctx.now)?;

    let mut guardian = GUARDIANS
        .may_load(deps.storage, (did_id.as_str(), &guardian_addr))?
        .filter(|g| g.active)
        .ok_or_else(|| ContractError::GuardianNotFound {
            did_id: did_id.clone(),
            guardian: guardian_addr.to_string(),
        })?;
    // Soft delete: the row and its reverse index entry stay
    guardian.active = false;
    GUARDIANS.save(deps.storage, (did_id.as_str(), &guardian_addr), &guardian)?;

    // The removed guardian's votes stop counting
    let retallied = retally_open_proposals(deps.storage, &ctx, &signer, &did_id)?;

    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &did_id,
        AuditAction::GuardianRemoved,
        None,
        vec![("guardian", guardian_addr.to_string())],
    )?;

    Ok(Response::new()
        .add_attribute("method", "remove_guardian")
        .add_attribute("did_id", did_id)
        .add_attribute("guardian", guardian_addr)
        .add_attribute("retallied", retallied.len().to_string()))
}

// Queries

pub fn query_guardians(deps: Deps, did_id: String) -> StdResult<GuardiansResponse> {
    let guardians = GUARDIANS
        .prefix(did_id.as_str())
        .range(deps.storage, None, None, Order::Ascending)
        .map(|item| item.map(|(_, guardian)| guardian))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(GuardiansResponse { guardians })
}

pub fn query_is_guardian(
    deps: Deps,
    did_id: String,
    address: String,
) -> StdResult<IsGuardianResponse> {
    let addr = deps.api.addr_validate(&address)?;
    Ok(IsGuardianResponse {
        is_guardian: is_active_guardian(deps.storage, &did_id, &addr)?,
    })
}

pub fn query_active_guardian_count(
    deps: Deps,
    did_id: String,
) -> StdResult<ActiveGuardianCountResponse> {
    let count = active_guardian_count(deps.storage, &did_id)?;
    Ok(ActiveGuardianCountResponse {
        did_id,
        count,
        threshold: majority_threshold(count),
    })
}

pub fn query_guarded_dids(deps: Deps, guardian: String) -> StdResult<GuardedDidsResponse> {
    let addr = deps.api.addr_validate(&guardian)?;
    let did_ids = GUARDED_DIDS
        .prefix(&addr)
        .keys(deps.storage, None, None, Order::Ascending)
        .collect::<StdResult<Vec<_>>>()?;
    Ok(GuardedDidsResponse { did_ids })
}
