use cosmwasm_std::{
    to_json_binary, to_json_vec, Addr, Api, Deps, DepsMut, Env, MessageInfo, Order, Response,
    StdResult, Storage,
};
use cw_storage_plus::Bound;
use shared::BlockContext;

use crate::audit;
use crate::contract::{validate_address, validate_signer};
use crate::error::ContractError;
use crate::msg::{
    DocumentHistoryResponse, DocumentPayload, DocumentResponse, DocumentsResponse,
    ExistsResponse, VerificationMethodInput, VerifyCredentialResponse,
};
use crate::state::{
    page_limit, AuditAction, Config, CriticalityLevel, DidDocument, DidMetadata, DidState,
    DidStatus, DocumentMetadata, HealthCheck, HealthStatus, Service, VerificationMethod, CONFIG,
    DIDS_BY_ORGANIZATION, DIDS_BY_STATE, DOCUMENTS, DOCUMENT_VERSIONS, METADATA,
};

pub const DEFAULT_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
pub const DEFAULT_ENVIRONMENT: &str = "prod";

pub fn load_document(storage: &dyn Storage, id: &str) -> Result<DidDocument, ContractError> {
    DOCUMENTS
        .may_load(storage, id)?
        .ok_or_else(|| ContractError::DidNotFound { id: id.to_string() })
}

/// Creator, listed controller, or controller of a usable verification method
pub fn is_authorized_controller(doc: &DidDocument, signer: &Addr, now: u64) -> bool {
    let signer = signer.as_str();
    doc.creator.as_str() == signer
        || doc.controller.iter().any(|c| c == signer)
        || doc
            .verification_method
            .iter()
            .any(|vm| vm.controller == signer && vm.is_usable_at(now))
}

pub fn authorize_controller(
    doc: &DidDocument,
    signer: &Addr,
    now: u64,
) -> Result<(), ContractError> {
    if !is_authorized_controller(doc, signer, now) {
        return Err(ContractError::Unauthorized {});
    }
    Ok(())
}

/// Content changes are only accepted on active documents
pub fn ensure_active(doc: &DidDocument) -> Result<(), ContractError> {
    if doc.state() != DidState::Active {
        return Err(ContractError::DidNotOperable {
            state: doc.state().to_string(),
        });
    }
    Ok(())
}

pub fn validate_did_id(id: &str) -> Result<(), ContractError> {
    if id.is_empty() {
        return Err(ContractError::InvalidDid {
            reason: "id must not be empty".to_string(),
        });
    }
    if !shared::is_valid_did_format(id) {
        return Err(ContractError::InvalidDid {
            reason: format!("{} does not match did:<method>:<identifier>", id),
        });
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ContractError {
    ContractError::InvalidDocument {
        reason: reason.into(),
    }
}

fn validate_method_input(
    method: &VerificationMethodInput,
    now: u64,
) -> Result<(), ContractError> {
    if method.id.is_empty() {
        return Err(invalid("verification method id must not be empty"));
    }
    if method.method_type.is_empty() {
        return Err(invalid(format!(
            "verification method {} has no type",
            method.id
        )));
    }
    if method.controller.is_empty() {
        return Err(invalid(format!(
            "verification method {} has no controller",
            method.id
        )));
    }
    let has_multibase = method
        .public_key_multibase
        .as_deref()
        .map_or(false, |key| !key.is_empty());
    let has_jwk = method
        .public_key_jwk
        .as_ref()
        .map_or(false, |jwk| !jwk.is_empty());
    if !has_multibase && !has_jwk {
        return Err(invalid(format!(
            "verification method {} has no public key",
            method.id
        )));
    }
    if let Some(expires_at) = method.expires_at {
        if expires_at <= now {
            return Err(invalid(format!(
                "verification method {} expires in the past",
                method.id
            )));
        }
    }
    Ok(())
}

fn validate_service(service: &Service) -> Result<(), ContractError> {
    if service.id.is_empty() {
        return Err(invalid("service id must not be empty"));
    }
    if service.service_type.is_empty() {
        return Err(invalid(format!("service {} has no type", service.id)));
    }
    if service.service_endpoint.trim().is_empty() {
        return Err(invalid(format!("service {} has no endpoint", service.id)));
    }
    Ok(())
}

/// Full payload validation, run before any write
pub fn validate_payload(
    api: &dyn Api,
    config: &Config,
    now: u64,
    payload: &DocumentPayload,
) -> Result<(), ContractError> {
    if payload.context.is_empty() || payload.context.iter().any(|c| c.is_empty()) {
        return Err(invalid("at least one context entry is required"));
    }
    for controller in &payload.controller {
        validate_address(api, "controller", controller)?;
    }
    for (i, method) in payload.verification_method.iter().enumerate() {
        validate_method_input(method, now)?;
        if payload.verification_method[..i]
            .iter()
            .any(|m| m.id == method.id)
        {
            return Err(ContractError::DuplicateVerificationMethod {
                id: method.id.clone(),
            });
        }
    }
    if payload.authentication.iter().any(|a| a.is_empty()) {
        return Err(invalid("authentication references must not be empty"));
    }
    for (i, service) in payload.service.iter().enumerate() {
        validate_service(service)?;
        if payload.service[..i].iter().any(|s| s.id == service.id) {
            return Err(ContractError::DuplicateService {
                id: service.id.clone(),
            });
        }
    }

    let size = to_json_vec(payload)?.len() as u64;
    if size > config.max_document_size {
        return Err(ContractError::DocumentTooLarge {
            size,
            max: config.max_document_size,
        });
    }
    Ok(())
}

fn build_method(input: VerificationMethodInput, now: u64) -> VerificationMethod {
    VerificationMethod {
        id: input.id,
        method_type: input.method_type,
        controller: input.controller,
        public_key_multibase: input.public_key_multibase,
        public_key_jwk: input.public_key_jwk,
        security_level: input.security_level.unwrap_or_default(),
        hsm_backed: input.hsm_backed,
        created_at: now,
        expires_at: input.expires_at,
        revoked: false,
        revoked_at: None,
    }
}

/// Structural problems of a stored document, empty when it is well formed
pub fn document_problems(doc: &DidDocument) -> Vec<String> {
    let mut problems = vec![];
    if !shared::is_valid_did_format(&doc.id) {
        problems.push(format!("invalid DID id {}", doc.id));
    }
    if doc.context.is_empty() {
        problems.push("missing context".to_string());
    }
    for vm in &doc.verification_method {
        if vm.id.is_empty() || vm.method_type.is_empty() || vm.controller.is_empty() {
            problems.push(format!("verification method {} is incomplete", vm.id));
        }
        if !vm.has_key_material() {
            problems.push(format!("verification method {} has no public key", vm.id));
        }
    }
    for service in &doc.service {
        if service.id.is_empty() || service.service_type.is_empty() {
            problems.push(format!("service {} is incomplete", service.id));
        }
    }
    problems
}

/// Stores `doc` over `stored`. Every document write goes through here: it
/// enforces the version bump, archives the previous copy, stamps provenance and
/// refreshes the metadata index.
pub fn write_document(
    storage: &mut dyn Storage,
    ctx: &BlockContext,
    stored: Option<&DidDocument>,
    doc: &mut DidDocument,
) -> Result<(), ContractError> {
    if let Some(stored) = stored {
        if doc.version <= stored.version {
            return Err(ContractError::VersionConflict {
                current: stored.version,
                proposed: doc.version,
            });
        }
        DOCUMENT_VERSIONS.save(storage, (stored.id.as_str(), stored.version), stored)?;
    }

    doc.updated_at = ctx.now;
    doc.metadata.updated = ctx.now;
    doc.metadata.version_id = doc.version.to_string();
    doc.chain_id = ctx.chain_id.clone();
    doc.block_height = ctx.height;
    doc.tx_hash = ctx.tx_hash.clone();

    DOCUMENTS.save(storage, &doc.id, doc)?;
    reindex(storage, stored, doc)?;
    Ok(())
}

fn reindex(
    storage: &mut dyn Storage,
    stored: Option<&DidDocument>,
    doc: &DidDocument,
) -> StdResult<()> {
    let id = doc.id.as_str();
    if let Some(stored) = stored {
        if let Some(org) = &stored.metadata.organization_id {
            if doc.metadata.organization_id.as_ref() != Some(org) {
                DIDS_BY_ORGANIZATION.remove(storage, (org.as_str(), id));
            }
        }
        if stored.state() != doc.state() {
            DIDS_BY_STATE.remove(storage, (stored.state().as_str(), id));
        }
    }
    if let Some(org) = &doc.metadata.organization_id {
        DIDS_BY_ORGANIZATION.save(storage, (org.as_str(), id), &())?;
    }
    DIDS_BY_STATE.save(storage, (doc.state().as_str(), id), &())?;
    METADATA.save(storage, id, &DocumentMetadata::of(doc))
}

/// Moves `doc` to `new_state` without writing it
fn apply_transition(
    doc: &mut DidDocument,
    new_state: DidState,
    reason: &str,
    actor: &Addr,
    now: u64,
) -> Result<DidState, ContractError> {
    let from = doc.state();
    if !from.can_transition_to(new_state) {
        return Err(ContractError::InvalidDidState {
            from: from.to_string(),
            to: new_state.to_string(),
        });
    }

    doc.status.state = new_state;
    doc.status.reason = reason.to_string();
    doc.status.updated_at = now;
    doc.status.updated_by = actor.clone();

    match new_state {
        DidState::Inactive | DidState::Revoked => {
            doc.status.health_check.status = HealthStatus::Unhealthy;
            doc.status.health_check.last_checked = now;
            doc.status
                .health_check
                .errors
                .push(format!("Document {}: {}", new_state, reason));
            doc.metadata.deactivated = true;
            doc.metadata.deactivated_at = Some(now);
        }
        DidState::Active => {
            doc.metadata.deactivated = false;
            doc.metadata.deactivated_at = None;
        }
        _ => {}
    }
    doc.version += 1;
    Ok(from)
}

/// Hands full control of a DID to `new_controller`: the controller list, the
/// creator slot, and revocation of methods held by anyone it displaces.
/// Returns the written document and the ids of the revoked methods.
pub fn apply_recovery(
    storage: &mut dyn Storage,
    ctx: &BlockContext,
    did_id: &str,
    new_controller: &Addr,
) -> Result<(DidDocument, Vec<String>), ContractError> {
    let stored = load_document(storage, did_id)?;
    if stored.state() == DidState::Revoked {
        return Err(ContractError::DidNotOperable {
            state: stored.state().to_string(),
        });
    }

    let mut displaced: Vec<String> = stored.controller.clone();
    displaced.push(stored.creator.to_string());
    displaced.retain(|c| c != new_controller.as_str());

    let mut doc = stored.clone();
    let mut revoked = vec![];
    for vm in doc.verification_method.iter_mut() {
        if !vm.revoked && displaced.contains(&vm.controller) {
            vm.revoked = true;
            vm.revoked_at = Some(ctx.now);
            revoked.push(vm.id.clone());
        }
    }
    doc.controller = vec![new_controller.to_string()];
    doc.creator = new_controller.clone();
    doc.status.updated_at = ctx.now;
    doc.status.updated_by = new_controller.clone();
    doc.version += 1;

    write_document(storage, ctx, Some(&stored), &mut doc)?;
    Ok((doc, revoked))
}

fn context_for(
    deps: &DepsMut,
    env: &Env,
    info: &MessageInfo,
) -> Result<(Addr, BlockContext), ContractError> {
    let signer = validate_signer(deps.api, info)?;
    Ok((signer, BlockContext::from_env(env)))
}

pub fn execute_create_did(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
    payload: DocumentPayload,
) -> Result<Response, ContractError> {
    let (creator, ctx) = context_for(&deps, &env, &info)?;
    let config = CONFIG.load(deps.storage)?;

    // Validate DID id format
    validate_did_id(&id)?;

    // Check if the DID is already registered
    if DOCUMENTS.has(deps.storage, &id) {
        return Err(ContractError::DidExists { id });
    }
    validate_payload(deps.api, &config, ctx.now, &payload)?;

    // Creator controls the document unless others are named
    let controller = if payload.controller.is_empty() {
        vec![creator.to_string()]
    } else {
        payload.controller
    };

    let mut doc = DidDocument {
        context: payload.context,
        id: id.clone(),
        controller,
        verification_method: payload
            .verification_method
            .into_iter()
            .map(|m| build_method(m, ctx.now))
            .collect(),
        authentication: payload.authentication,
        service: payload.service,
        status: DidStatus {
            state: DidState::Active,
            reason: "created".to_string(),
            updated_at: ctx.now,
            updated_by: creator.clone(),
            health_check: HealthCheck {
                status: HealthStatus::Healthy,
                last_checked: ctx.now,
                errors: vec![],
            },
        },
        metadata: DidMetadata {
            created: ctx.now,
            updated: ctx.now,
            version_id: "1".to_string(),
            deactivated: false,
            deactivated_at: None,
            tags: payload.tags,
            organization_id: payload.organization_id,
            environment: payload
                .environment
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            criticality_level: payload.criticality_level.unwrap_or(CriticalityLevel::Medium),
        },
        version: 1,
        creator: creator.clone(),
        created_at: ctx.now,
        updated_at: ctx.now,
        chain_id: ctx.chain_id.clone(),
        block_height: ctx.height,
        tx_hash: ctx.tx_hash.clone(),
    };

    write_document(deps.storage, &ctx, None, &mut doc)?;
    audit::record(
        deps.storage,
        &ctx,
        &creator,
        &id,
        AuditAction::DocumentCreated,
        None,
        vec![("version", "1".to_string())],
    )?;

    Ok(Response::new()
        .add_attribute("method", "create_did")
        .add_attribute("did_id", id)
        .add_attribute("creator", creator)
        .add_attribute("version", "1"))
}

pub fn execute_update_did(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
    version: u64,
    payload: DocumentPayload,
) -> Result<Response, ContractError> {
    let (signer, ctx) = context_for(&deps, &env, &info)?;
    let config = CONFIG.load(deps.storage)?;

    validate_did_id(&id)?;
    let stored = load_document(deps.storage, &id)?;
    authorize_controller(&stored, &signer, ctx.now)?;
    ensure_active(&stored)?;

    // Reject stale writes
    if version <= stored.version {
        return Err(ContractError::VersionConflict {
            current: stored.version,
            proposed: version,
        });
    }
    validate_payload(deps.api, &config, ctx.now, &payload)?;

    let mut doc = stored.clone();
    doc.context = payload.context;
    doc.controller = if payload.controller.is_empty() {
        vec![stored.creator.to_string()]
    } else {
        payload.controller
    };
    // Methods that survive the update keep their creation time and revocation
    doc.verification_method = payload
        .verification_method
        .into_iter()
        .map(|input| {
            let mut method = build_method(input, ctx.now);
            if let Some(previous) = stored.find_method(&method.id) {
                method.created_at = previous.created_at;
                method.revoked = previous.revoked;
                method.revoked_at = previous.revoked_at;
            }
            method
        })
        .collect();
    doc.authentication = payload.authentication;
    doc.service = payload.service;
    doc.metadata.tags = payload.tags;
    doc.metadata.organization_id = payload.organization_id;
    if let Some(environment) = payload.environment {
        doc.metadata.environment = environment;
    }
    if let Some(level) = payload.criticality_level {
        doc.metadata.criticality_level = level;
    }
    doc.version = version;

    write_document(deps.storage, &ctx, Some(&stored), &mut doc)?;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &id,
        AuditAction::DocumentUpdated,
        None,
        vec![
            ("previous_version", stored.version.to_string()),
            ("new_version", version.to_string()),
        ],
    )?;

    Ok(Response::new()
        .add_attribute("method", "update_did")
        .add_attribute("did_id", id)
        .add_attribute("version", version.to_string()))
}

pub fn execute_transition_state(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
    new_state: DidState,
    reason: String,
) -> Result<Response, ContractError> {
    let (signer, ctx) = context_for(&deps, &env, &info)?;

    let stored = load_document(deps.storage, &id)?;
    authorize_controller(&stored, &signer, ctx.now)?;

    // Graph check, health and deactivation flags
    let mut doc = stored.clone();
    let from = apply_transition(&mut doc, new_state, &reason, &signer, ctx.now)?;
    write_document(deps.storage, &ctx, Some(&stored), &mut doc)?;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &id,
        AuditAction::StateTransitioned,
        None,
        vec![
            ("from", from.to_string()),
            ("to", new_state.to_string()),
            ("reason", reason),
        ],
    )?;

    Ok(Response::new()
        .add_attribute("method", "transition_state")
        .add_attribute("did_id", id)
        .add_attribute("from", from.as_str())
        .add_attribute("to", new_state.as_str())
        .add_attribute("version", doc.version.to_string()))
}

pub fn execute_deactivate_did(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
) -> Result<Response, ContractError> {
    let res = execute_transition_state(
        deps,
        env,
        info,
        id,
        DidState::Inactive,
        "deactivated by controller".to_string(),
    )?;
    Ok(Response::new()
        .add_attribute("method", "deactivate_did")
        .add_attributes(res.attributes.into_iter().skip(1)))
}

pub fn execute_resolve_did(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
) -> Result<Response, ContractError> {
    let (reader, ctx) = context_for(&deps, &env, &info)?;
    let config = CONFIG.load(deps.storage)?;
    let document = load_document(deps.storage, &id)?;

    if config.audit_reads {
        // The read must succeed even when its access record cannot be written
        if let Err(err) = audit::record(
            deps.storage,
            &ctx,
            &reader,
            &id,
            AuditAction::DocumentAccessed,
            None,
            vec![("version", document.version.to_string())],
        ) {
            deps.api
                .debug(&format!("did-registry: access audit for {} failed: {}", id, err));
        }
    }

    Ok(Response::new()
        .add_attribute("method", "resolve_did")
        .add_attribute("did_id", id)
        .add_attribute("version", document.version.to_string())
        .set_data(to_json_binary(&DocumentResponse { document })?))
}

pub fn execute_add_verification_method(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
    method: VerificationMethodInput,
) -> Result<Response, ContractError> {
    let (signer, ctx) = context_for(&deps, &env, &info)?;

    let stored = load_document(deps.storage, &id)?;
    authorize_controller(&stored, &signer, ctx.now)?;
    ensure_active(&stored)?;
    validate_method_input(&method, ctx.now)?;
    if stored.find_method(&method.id).is_some() {
        return Err(ContractError::DuplicateVerificationMethod { id: method.id });
    }

    let method_id = method.id.clone();
    let mut doc = stored.clone();
    doc.verification_method.push(build_method(method, ctx.now));
    doc.version += 1;
    write_document(deps.storage, &ctx, Some(&stored), &mut doc)?;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &id,
        AuditAction::VerificationMethodAdded,
        None,
        vec![("method_id", method_id.clone())],
    )?;

    Ok(Response::new()
        .add_attribute("method", "add_verification_method")
        .add_attribute("did_id", id)
        .add_attribute("method_id", method_id)
        .add_attribute("version", doc.version.to_string()))
}

pub fn execute_revoke_verification_method(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
    method_id: String,
) -> Result<Response, ContractError> {
    let (signer, ctx) = context_for(&deps, &env, &info)?;

    let stored = load_document(deps.storage, &id)?;
    authorize_controller(&stored, &signer, ctx.now)?;
    ensure_active(&stored)?;

    let mut doc = stored.clone();
    let method = doc
        .verification_method
        .iter_mut()
        .find(|vm| vm.id == method_id)
        .ok_or_else(|| ContractError::VerificationMethodNotFound {
            id: method_id.clone(),
        })?;
    if method.revoked {
        return Err(ContractError::KeyRevoked { id: method_id });
    }
    method.revoked = true;
    method.revoked_at = Some(ctx.now);
    doc.version += 1;

    write_document(deps.storage, &ctx, Some(&stored), &mut doc)?;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &id,
        AuditAction::VerificationMethodRevoked,
        None,
        vec![("method_id", method_id.clone())],
    )?;

    Ok(Response::new()
        .add_attribute("method", "revoke_verification_method")
        .add_attribute("did_id", id)
        .add_attribute("method_id", method_id)
        .add_attribute("version", doc.version.to_string()))
}

pub fn execute_add_service(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
    service: Service,
) -> Result<Response, ContractError> {
    let (signer, ctx) = context_for(&deps, &env, &info)?;

    let stored = load_document(deps.storage, &id)?;
    authorize_controller(&stored, &signer, ctx.now)?;
    ensure_active(&stored)?;
    validate_service(&service)?;
    if stored.service.iter().any(|s| s.id == service.id) {
        return Err(ContractError::DuplicateService { id: service.id });
    }

    let service_id = service.id.clone();
    let mut doc = stored.clone();
    doc.service.push(service);
    doc.version += 1;
    write_document(deps.storage, &ctx, Some(&stored), &mut doc)?;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &id,
        AuditAction::ServiceAdded,
        None,
        vec![("service_id", service_id.clone())],
    )?;

    Ok(Response::new()
        .add_attribute("method", "add_service")
        .add_attribute("did_id", id)
        .add_attribute("service_id", service_id)
        .add_attribute("version", doc.version.to_string()))
}

pub fn execute_remove_service(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
    service_id: String,
) -> Result<Response, ContractError> {
    let (signer, ctx) = context_for(&deps, &env, &info)?;

    let stored = load_document(deps.storage, &id)?;
    authorize_controller(&stored, &signer, ctx.now)?;
    ensure_active(&stored)?;

    let mut doc = stored.clone();
    let before = doc.service.len();
    doc.service.retain(|s| s.id != service_id);
    if doc.service.len() == before {
        return Err(ContractError::ServiceNotFound { id: service_id });
    }
    doc.version += 1;

    write_document(deps.storage, &ctx, Some(&stored), &mut doc)?;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &id,
        AuditAction::ServiceRemoved,
        None,
        vec![("service_id", service_id.clone())],
    )?;

    Ok(Response::new()
        .add_attribute("method", "remove_service")
        .add_attribute("did_id", id)
        .add_attribute("service_id", service_id)
        .add_attribute("version", doc.version.to_string()))
}

pub fn execute_check_health(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    id: String,
) -> Result<Response, ContractError> {
    let (signer, ctx) = context_for(&deps, &env, &info)?;

    let stored = load_document(deps.storage, &id)?;
    authorize_controller(&stored, &signer, ctx.now)?;

    let mut errors = document_problems(&stored);
    for vm in &stored.verification_method {
        if vm.revoked {
            errors.push(format!("Verification method {} is revoked", vm.id));
        } else if vm.is_expired_at(ctx.now) {
            errors.push(format!("Verification method {} has expired", vm.id));
        }
    }
    for service in &stored.service {
        if service.service_endpoint.trim().is_empty() {
            errors.push(format!("Service {} has an empty endpoint", service.id));
        }
    }
    if matches!(stored.state(), DidState::Inactive | DidState::Revoked) {
        errors.push(format!("Document {}", stored.state()));
    }

    let status = if errors.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    let error_count = errors.len();

    let mut doc = stored.clone();
    doc.status.health_check = HealthCheck {
        status,
        last_checked: ctx.now,
        errors,
    };
    doc.version += 1;
    write_document(deps.storage, &ctx, Some(&stored), &mut doc)?;

    let healthy = status == HealthStatus::Healthy;
    audit::record(
        deps.storage,
        &ctx,
        &signer,
        &id,
        AuditAction::HealthChecked,
        None,
        vec![
            ("healthy", healthy.to_string()),
            ("errors", error_count.to_string()),
        ],
    )?;

    Ok(Response::new()
        .add_attribute("method", "check_health")
        .add_attribute("did_id", id)
        .add_attribute("healthy", healthy.to_string())
        .add_attribute("version", doc.version.to_string()))
}

// Queries

pub fn query_document(deps: Deps, id: String) -> StdResult<DocumentResponse> {
    let document = DOCUMENTS.load(deps.storage, &id)?;
    Ok(DocumentResponse { document })
}

pub fn query_document_exists(deps: Deps, id: String) -> StdResult<ExistsResponse> {
    Ok(ExistsResponse {
        exists: DOCUMENTS.has(deps.storage, &id),
    })
}

pub fn query_document_version(deps: Deps, id: String, version: u64) -> StdResult<DocumentResponse> {
    let current = DOCUMENTS.load(deps.storage, &id)?;
    let document = if current.version == version {
        current
    } else {
        DOCUMENT_VERSIONS.load(deps.storage, (id.as_str(), version))?
    };
    Ok(DocumentResponse { document })
}

pub fn query_document_history(
    deps: Deps,
    id: String,
    start_after: Option<u64>,
    limit: Option<u32>,
) -> StdResult<DocumentHistoryResponse> {
    let start = start_after.map(Bound::exclusive);
    let versions = DOCUMENT_VERSIONS
        .prefix(id.as_str())
        .range(deps.storage, start, None, Order::Ascending)
        .take(page_limit(limit))
        .map(|item| item.map(|(_, doc)| doc))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(DocumentHistoryResponse { versions })
}

pub fn query_list_documents(
    deps: Deps,
    organization_id: Option<String>,
    state: Option<DidState>,
    start_after: Option<String>,
    limit: Option<u32>,
) -> StdResult<DocumentsResponse> {
    let limit = page_limit(limit);
    let start = start_after.as_deref().map(Bound::exclusive);

    let ids = match (&organization_id, state) {
        (Some(org), _) => DIDS_BY_ORGANIZATION.prefix(org.as_str()).keys(
            deps.storage,
            start,
            None,
            Order::Ascending,
        ),
        (None, Some(state)) => DIDS_BY_STATE.prefix(state.as_str()).keys(
            deps.storage,
            start,
            None,
            Order::Ascending,
        ),
        (None, None) => METADATA.keys(deps.storage, start, None, Order::Ascending),
    };

    let mut documents = vec![];
    for id in ids {
        if documents.len() >= limit {
            break;
        }
        let metadata = METADATA.load(deps.storage, &id?)?;
        if state.map_or(true, |s| metadata.state == s) {
            documents.push(metadata);
        }
    }
    Ok(DocumentsResponse { documents })
}

pub fn query_verify_credential(
    deps: Deps,
    env: Env,
    did_id: String,
    verification_method_id: String,
) -> StdResult<VerifyCredentialResponse> {
    let now = env.block.time.seconds();
    let reason = match DOCUMENTS.may_load(deps.storage, &did_id)? {
        None => Some("DID not found".to_string()),
        Some(doc) if doc.state() != DidState::Active => Some(format!("DID is {}", doc.state())),
        Some(doc) => match doc.find_method(&verification_method_id) {
            None => Some("verification method not found".to_string()),
            Some(vm) if vm.revoked => Some("verification method revoked".to_string()),
            Some(vm) if vm.is_expired_at(now) => Some("verification method expired".to_string()),
            Some(_) => None,
        },
    };
    Ok(VerifyCredentialResponse {
        valid: reason.is_none(),
        reason: reason.unwrap_or_else(|| "valid".to_string()),
    })
}
