use cosmwasm_std::{
    entry_point, to_json_binary, Addr, Api, Binary, Deps, DepsMut, Env, MessageInfo, Response,
    StdResult,
};
use cw2::{get_contract_version, set_contract_version};
use shared::BlockContext;

use crate::error::ContractError;
use crate::msg::{ExecuteMsg, InstantiateMsg, MigrateMsg, QueryMsg, SudoMsg, SweepResponse};
use crate::state::{Config, CONFIG};
use crate::{audit, document, guardian, invariants, recovery};

const CONTRACT_NAME: &str = "crates.io:did-registry";
const CONTRACT_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_AUDIT_READS: bool = true;
const DEFAULT_PROPOSAL_TTL: u64 = 604_800; // 7 days
const DEFAULT_MAX_PROPOSAL_TTL: u64 = 2_592_000; // 30 days
const DEFAULT_MAX_GUARDIANS: u32 = 10;
const DEFAULT_MAX_DOCUMENT_SIZE: u64 = 10_000; // 10KB

/// Re-checks the message signer before any state is touched
pub fn validate_signer(api: &dyn Api, info: &MessageInfo) -> Result<Addr, ContractError> {
    api.addr_validate(info.sender.as_str())
        .map_err(|_| ContractError::InvalidCreator {
            address: info.sender.to_string(),
        })
}

pub fn validate_address(api: &dyn Api, field: &str, address: &str) -> Result<Addr, ContractError> {
    api.addr_validate(address)
        .map_err(|_| ContractError::InvalidAddress {
            field: field.to_string(),
            address: address.to_string(),
        })
}

fn validate_config(config: &Config) -> Result<(), ContractError> {
    let invalid = |reason: &str| {
        Err(ContractError::InvalidConfig {
            reason: reason.to_string(),
        })
    };
    if config.default_proposal_ttl == 0 || config.max_proposal_ttl == 0 {
        return invalid("proposal ttl must be positive");
    }
    if config.default_proposal_ttl > config.max_proposal_ttl {
        return invalid("default proposal ttl exceeds the maximum");
    }
    if config.max_guardians == 0 {
        return invalid("max_guardians must be at least 1");
    }
    if config.max_document_size == 0 {
        return invalid("max_document_size must be positive");
    }
    Ok(())
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn instantiate(
    deps: DepsMut,
    _env: Env,
    info: MessageInfo,
    msg: InstantiateMsg,
) -> Result<Response, ContractError> {
    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;

    let admin = match msg.admin {
        Some(admin) => validate_address(deps.api, "admin", &admin)?,
        None => validate_signer(deps.api, &info)?,
    };
    let config = Config {
        admin,
        audit_reads: msg.audit_reads.unwrap_or(DEFAULT_AUDIT_READS),
        default_proposal_ttl: msg.default_proposal_ttl.unwrap_or(DEFAULT_PROPOSAL_TTL),
        max_proposal_ttl: msg.max_proposal_ttl.unwrap_or(DEFAULT_MAX_PROPOSAL_TTL),
        max_guardians: msg.max_guardians.unwrap_or(DEFAULT_MAX_GUARDIANS),
        max_document_size: msg.max_document_size.unwrap_or(DEFAULT_MAX_DOCUMENT_SIZE),
    };
    validate_config(&config)?;
    CONFIG.save(deps.storage, &config)?;

    Ok(Response::new()
        .add_attribute("method", "instantiate")
        .add_attribute("admin", config.admin)
        .add_attribute("max_guardians", config.max_guardians.to_string())
        .add_attribute(
            "default_proposal_ttl",
            config.default_proposal_ttl.to_string(),
        ))
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn execute(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    msg: ExecuteMsg,
) -> Result<Response, ContractError> {
    match msg {
        ExecuteMsg::UpdateConfig {
            admin,
            audit_reads,
            default_proposal_ttl,
            max_proposal_ttl,
            max_guardians,
            max_document_size,
        } => execute_update_config(
            deps,
            info,
            admin,
            audit_reads,
            default_proposal_ttl,
            max_proposal_ttl,
            max_guardians,
            max_document_size,
        ),
        ExecuteMsg::CreateDid { id, document } => {
            document::execute_create_did(deps, env, info, id, document)
        }
        ExecuteMsg::UpdateDid {
            id,
            version,
            document,
        } => document::execute_update_did(deps, env, info, id, version, document),
        ExecuteMsg::DeactivateDid { id } => document::execute_deactivate_did(deps, env, info, id),
        ExecuteMsg::ResolveDid { id } => document::execute_resolve_did(deps, env, info, id),
        ExecuteMsg::TransitionState {
            id,
            new_state,
            reason,
        } => document::execute_transition_state(deps, env, info, id, new_state, reason),
        ExecuteMsg::AddVerificationMethod { id, method } => {
            document::execute_add_verification_method(deps, env, info, id, method)
        }
        ExecuteMsg::RevokeVerificationMethod { id, method_id } => {
            document::execute_revoke_verification_method(deps, env, info, id, method_id)
        }
        ExecuteMsg::AddService { id, service } => {
            document::execute_add_service(deps, env, info, id, service)
        }
        ExecuteMsg::RemoveService { id, service_id } => {
            document::execute_remove_service(deps, env, info, id, service_id)
        }
        ExecuteMsg::CheckHealth { id } => document::execute_check_health(deps, env, info, id),
        ExecuteMsg::AddGuardian {
            did_id,
            guardian_address,
            public_key,
        } => guardian::execute_add_guardian(deps, env, info, did_id, guardian_address, public_key),
        ExecuteMsg::RemoveGuardian {
            did_id,
            guardian_address,
        } => guardian::execute_remove_guardian(deps, env, info, did_id, guardian_address),
        ExecuteMsg::ProposeRecovery {
            did_id,
            new_controller,
            reason,
            ttl_seconds,
        } => recovery::execute_propose_recovery(
            deps,
            env,
            info,
            did_id,
            new_controller,
            reason,
            ttl_seconds,
        ),
        ExecuteMsg::ApproveRecovery { proposal_id } => {
            recovery::execute_vote(deps, env, info, proposal_id, true, None)
        }
        ExecuteMsg::RejectRecovery {
            proposal_id,
            reason,
        } => recovery::execute_vote(deps, env, info, proposal_id, false, reason),
        ExecuteMsg::ExecuteRecovery { proposal_id } => {
            recovery::execute_execute_recovery(deps, env, info, proposal_id)
        }
        ExecuteMsg::ExpireProposal { proposal_id } => {
            recovery::execute_expire_proposal(deps, env, info, proposal_id)
        }
        ExecuteMsg::SweepExpiredProposals { limit } => {
            recovery::execute_sweep_expired(deps, env, info, limit)
        }
        ExecuteMsg::SubmitSignatureShare {
            proposal_id,
            signature_share,
            public_key_share,
        } => recovery::execute_submit_signature_share(
            deps,
            env,
            info,
            proposal_id,
            signature_share,
            public_key_share,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn execute_update_config(
    deps: DepsMut,
    info: MessageInfo,
    admin: Option<String>,
    audit_reads: Option<bool>,
    default_proposal_ttl: Option<u64>,
    max_proposal_ttl: Option<u64>,
    max_guardians: Option<u32>,
    max_document_size: Option<u64>,
) -> Result<Response, ContractError> {
    let sender = validate_signer(deps.api, &info)?;
    let mut config = CONFIG.load(deps.storage)?;
    if sender != config.admin {
        return Err(ContractError::Unauthorized {});
    }

    if let Some(admin) = admin {
        config.admin = validate_address(deps.api, "admin", &admin)?;
    }
    if let Some(audit_reads) = audit_reads {
        config.audit_reads = audit_reads;
    }
    if let Some(ttl) = default_proposal_ttl {
        config.default_proposal_ttl = ttl;
    }
    if let Some(ttl) = max_proposal_ttl {
        config.max_proposal_ttl = ttl;
    }
    if let Some(max) = max_guardians {
        config.max_guardians = max;
    }
    if let Some(max) = max_document_size {
        config.max_document_size = max;
    }
    validate_config(&config)?;
    CONFIG.save(deps.storage, &config)?;

    Ok(Response::new()
        .add_attribute("method", "update_config")
        .add_attribute("admin", config.admin))
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn sudo(deps: DepsMut, env: Env, msg: SudoMsg) -> Result<Response, ContractError> {
    match msg {
        SudoMsg::EndBlock {} => {
            let ctx = BlockContext::from_env(&env);
            let expired = recovery::sweep_expired(
                deps.storage,
                &ctx,
                &env.contract.address,
                recovery::END_BLOCK_SWEEP_LIMIT,
            )?;
            if !expired.is_empty() {
                deps.api.debug(&format!(
                    "did-registry: end block at height {} expired {} proposal(s)",
                    ctx.height,
                    expired.len()
                ));
            }
            Ok(Response::new()
                .add_attribute("method", "end_block")
                .add_attribute("expired", expired.len().to_string())
                .set_data(to_json_binary(&SweepResponse { expired })?))
        }
    }
}

/// Dotted numeric versions only; pre-release or build suffixes are refused
fn parse_version(version: &str) -> Result<Vec<u64>, ContractError> {
    version
        .split('.')
        .map(|part| {
            part.parse().map_err(|_| ContractError::InvalidMigration {
                reason: format!("unsupported version {}", version),
            })
        })
        .collect()
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn migrate(deps: DepsMut, _env: Env, _msg: MigrateMsg) -> Result<Response, ContractError> {
    let stored = get_contract_version(deps.storage)?;
    if stored.contract != CONTRACT_NAME {
        return Err(ContractError::InvalidMigration {
            reason: format!("cannot migrate from {}", stored.contract),
        });
    }
    if parse_version(&stored.version)? > parse_version(CONTRACT_VERSION)? {
        return Err(ContractError::InvalidMigration {
            reason: format!(
                "cannot downgrade from {} to {}",
                stored.version, CONTRACT_VERSION
            ),
        });
    }
    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;

    Ok(Response::new()
        .add_attribute("method", "migrate")
        .add_attribute("from_version", stored.version)
        .add_attribute("to_version", CONTRACT_VERSION))
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn query(deps: Deps, env: Env, msg: QueryMsg) -> StdResult<Binary> {
    match msg {
        QueryMsg::Config {} => to_json_binary(&CONFIG.load(deps.storage)?),
        QueryMsg::GetDocument { id } => to_json_binary(&document::query_document(deps, id)?),
        QueryMsg::DocumentExists { id } => {
            to_json_binary(&document::query_document_exists(deps, id)?)
        }
        QueryMsg::GetDocumentVersion { id, version } => {
            to_json_binary(&document::query_document_version(deps, id, version)?)
        }
        QueryMsg::GetDocumentHistory {
            id,
            start_after,
            limit,
        } => to_json_binary(&document::query_document_history(
            deps,
            id,
            start_after,
            limit,
        )?),
        QueryMsg::ListDocuments {
            organization_id,
            state,
            start_after,
            limit,
        } => to_json_binary(&document::query_list_documents(
            deps,
            organization_id,
            state,
            start_after,
            limit,
        )?),
        QueryMsg::VerifyCredential {
            did_id,
            verification_method_id,
        } => to_json_binary(&document::query_verify_credential(
            deps,
            env,
            did_id,
            verification_method_id,
        )?),
        QueryMsg::GetGuardians { did_id } => {
            to_json_binary(&guardian::query_guardians(deps, did_id)?)
        }
        QueryMsg::IsGuardian { did_id, address } => {
            to_json_binary(&guardian::query_is_guardian(deps, did_id, address)?)
        }
        QueryMsg::GetActiveGuardianCount { did_id } => {
            to_json_binary(&guardian::query_active_guardian_count(deps, did_id)?)
        }
        QueryMsg::GetGuardedDids { guardian } => {
            to_json_binary(&guardian::query_guarded_dids(deps, guardian)?)
        }
        QueryMsg::GetProposal { proposal_id } => {
            to_json_binary(&recovery::query_proposal(deps, env, proposal_id)?)
        }
        QueryMsg::GetProposalsByDid {
            did_id,
            start_after,
            limit,
        } => to_json_binary(&recovery::query_proposals_by_did(
            deps,
            env,
            did_id,
            start_after,
            limit,
        )?),
        QueryMsg::GetPendingProposals { start_after, limit } => to_json_binary(
            &recovery::query_pending_proposals(deps, env, start_after, limit)?,
        ),
        QueryMsg::GetSignatureShares { proposal_id } => {
            to_json_binary(&recovery::query_signature_shares(deps, proposal_id)?)
        }
        QueryMsg::GetAuditLog {
            did_id,
            start_after,
            limit,
        } => to_json_binary(&audit::query_audit_log(deps, did_id, start_after, limit)?),
        QueryMsg::GetProposalAuditLog { proposal_id, limit } => {
            to_json_binary(&audit::query_proposal_audit_log(deps, proposal_id, limit)?)
        }
        QueryMsg::CheckInvariants {} => {
            to_json_binary(&invariants::check_all(deps, env.block.time.seconds())?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmwasm_std::from_json;
    use cosmwasm_std::testing::{mock_dependencies, mock_env, mock_info};

    #[test]
    fn proper_initialization() {
        let mut deps = mock_dependencies();
        let info = mock_info("creator", &[]);
        let res = instantiate(deps.as_mut(), mock_env(), info, InstantiateMsg::default()).unwrap();
        assert_eq!(0, res.messages.len());

        let res = query(deps.as_ref(), mock_env(), QueryMsg::Config {}).unwrap();
        let config: Config = from_json(&res).unwrap();
        assert_eq!(Addr::unchecked("creator"), config.admin);
        assert!(config.audit_reads);
        assert_eq!(DEFAULT_PROPOSAL_TTL, config.default_proposal_ttl);
        assert_eq!(DEFAULT_MAX_PROPOSAL_TTL, config.max_proposal_ttl);
        assert_eq!(DEFAULT_MAX_GUARDIANS, config.max_guardians);
        assert_eq!(DEFAULT_MAX_DOCUMENT_SIZE, config.max_document_size);

        let version = get_contract_version(deps.as_ref().storage).unwrap();
        assert_eq!(CONTRACT_NAME, version.contract);
    }

    #[test]
    fn instantiate_rejects_inconsistent_ttl() {
        let mut deps = mock_dependencies();
        let err = instantiate(
            deps.as_mut(),
            mock_env(),
            mock_info("creator", &[]),
            InstantiateMsg {
                default_proposal_ttl: Some(100),
                max_proposal_ttl: Some(50),
                ..InstantiateMsg::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ContractError::InvalidConfig { .. }));
    }

    #[test]
    fn update_config_is_admin_only() {
        let mut deps = mock_dependencies();
        instantiate(
            deps.as_mut(),
            mock_env(),
            mock_info("creator", &[]),
            InstantiateMsg::default(),
        )
        .unwrap();

        let update = |max_guardians: u32| ExecuteMsg::UpdateConfig {
            admin: None,
            audit_reads: Some(false),
            default_proposal_ttl: None,
            max_proposal_ttl: None,
            max_guardians: Some(max_guardians),
            max_document_size: None,
        };

        let err = execute(deps.as_mut(), mock_env(), mock_info("mallory", &[]), update(5))
            .unwrap_err();
        assert_eq!(ContractError::Unauthorized {}, err);

        let err = execute(deps.as_mut(), mock_env(), mock_info("creator", &[]), update(0))
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidConfig { .. }));

        execute(deps.as_mut(), mock_env(), mock_info("creator", &[]), update(5)).unwrap();
        let config = CONFIG.load(deps.as_ref().storage).unwrap();
        assert_eq!(5, config.max_guardians);
        assert!(!config.audit_reads);
    }

    #[test]
    fn migrate_refuses_foreign_contract_and_downgrade() {
        let mut deps = mock_dependencies();
        set_contract_version(deps.as_mut().storage, "crates.io:other", "0.1.0").unwrap();
        let err = migrate(deps.as_mut(), mock_env(), MigrateMsg {}).unwrap_err();
        assert!(matches!(err, ContractError::InvalidMigration { .. }));

        set_contract_version(deps.as_mut().storage, CONTRACT_NAME, "99.0.0").unwrap();
        let err = migrate(deps.as_mut(), mock_env(), MigrateMsg {}).unwrap_err();
        assert!(matches!(err, ContractError::InvalidMigration { .. }));

        set_contract_version(deps.as_mut().storage, CONTRACT_NAME, "0.1.0-beta").unwrap();
        let err = migrate(deps.as_mut(), mock_env(), MigrateMsg {}).unwrap_err();
        assert_eq!(
            ContractError::InvalidMigration {
                reason: "unsupported version 0.1.0-beta".to_string()
            },
            err
        );

        set_contract_version(deps.as_mut().storage, CONTRACT_NAME, "0.0.1").unwrap();
        migrate(deps.as_mut(), mock_env(), MigrateMsg {}).unwrap();
        assert_eq!(
            CONTRACT_VERSION,
            get_contract_version(deps.as_ref().storage).unwrap().version
        );
    }

    #[test]
    fn signer_must_be_valid() {
        let deps = mock_dependencies();
        let err = validate_signer(deps.as_ref().api, &mock_info("NOT VALID", &[])).unwrap_err();
        assert!(matches!(err, ContractError::InvalidCreator { .. }));
    }
}
