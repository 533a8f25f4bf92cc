use cosmwasm_std::{Addr, Deps, Order, StdResult, Storage};
use cw_storage_plus::Bound;
use shared::BlockContext;

use crate::msg::AuditLogResponse;
use crate::state::{
    AuditAction, AuditEntry, AUDIT_BY_DID, AUDIT_BY_PROPOSAL, AUDIT_LOG, NEXT_AUDIT_ID,
};

/// Appends one entry to the log and its indexes. Returns the new entry id.
pub fn record(
    storage: &mut dyn Storage,
    ctx: &BlockContext,
    actor: &Addr,
    did: &str,
    action: AuditAction,
    proposal_id: Option<u64>,
    data: Vec<(&str, String)>,
) -> StdResult<u64> {
    let id = NEXT_AUDIT_ID.may_load(storage)?.unwrap_or(1);

    let entry = AuditEntry {
        id,
        did: did.to_string(),
        action,
        actor: actor.clone(),
        timestamp: ctx.now,
        block_height: ctx.height,
        tx_hash: ctx.tx_hash.clone(),
        proposal_id,
        data: data
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    };

    AUDIT_LOG.save(storage, id, &entry)?;
    AUDIT_BY_DID.save(storage, (did, id), &())?;
    if let Some(proposal_id) = proposal_id {
        AUDIT_BY_PROPOSAL.save(storage, (proposal_id, id), &())?;
    }
    // Counter moves only once the entry is in place
    NEXT_AUDIT_ID.save(storage, &(id + 1))?;
    Ok(id)
}

fn take_limit(limit: Option<u32>) -> usize {
    match limit {
        None | Some(0) => usize::MAX,
        Some(n) => n as usize,
    }
}

pub fn query_audit_log(
    deps: Deps,
    did_id: String,
    start_after: Option<u64>,
    limit: Option<u32>,
) -> StdResult<AuditLogResponse> {
    let start = start_after.map(Bound::exclusive);
    let entries = AUDIT_BY_DID
        .prefix(did_id.as_str())
        .keys(deps.storage, start, None, Order::Ascending)
        .take(take_limit(limit))
        .map(|id| AUDIT_LOG.load(deps.storage, id?))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(AuditLogResponse { entries })
}

pub fn query_proposal_audit_log(
    deps: Deps,
    proposal_id: u64,
    limit: Option<u32>,
) -> StdResult<AuditLogResponse> {
    let entries = AUDIT_BY_PROPOSAL
        .prefix(proposal_id)
        .keys(deps.storage, None, None, Order::Ascending)
        .take(take_limit(limit))
        .map(|id| AUDIT_LOG.load(deps.storage, id?))
        .collect::<StdResult<Vec<_>>>()?;
    Ok(AuditLogResponse { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmwasm_std::testing::{mock_dependencies, mock_env, MockStorage};
    use cosmwasm_std::Record;

    /// Storage that remembers the order of writes
    #[derive(Default)]
    struct WriteLog {
        inner: MockStorage,
        writes: Vec<Vec<u8>>,
    }

    impl Storage for WriteLog {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.inner.get(key)
        }

        fn range<'a>(
            &'a self,
            start: Option<&[u8]>,
            end: Option<&[u8]>,
            order: Order,
        ) -> Box<dyn Iterator<Item = Record> + 'a> {
            self.inner.range(start, end, order)
        }

        fn set(&mut self, key: &[u8], value: &[u8]) {
            self.writes.push(key.to_vec());
            self.inner.set(key, value);
        }

        fn remove(&mut self, key: &[u8]) {
            self.writes.push(key.to_vec());
            self.inner.remove(key);
        }
    }

    fn log(
        storage: &mut dyn Storage,
        did: &str,
        action: AuditAction,
        proposal_id: Option<u64>,
    ) -> u64 {
        let ctx = BlockContext::from_env(&mock_env());
        record(
            storage,
            &ctx,
            &Addr::unchecked("alice"),
            did,
            action,
            proposal_id,
            vec![("note", "x".to_string())],
        )
        .unwrap()
    }

    #[test]
    fn entries_come_back_in_insertion_order() {
        let mut deps = mock_dependencies();
        let did = "did:persona:abc";
        let other = "did:persona:other";
        assert_eq!(1, log(&mut deps.storage, did, AuditAction::DocumentCreated, None));
        assert_eq!(2, log(&mut deps.storage, other, AuditAction::DocumentCreated, None));
        assert_eq!(3, log(&mut deps.storage, did, AuditAction::DocumentUpdated, None));
        assert_eq!(4, log(&mut deps.storage, did, AuditAction::GuardianAdded, None));

        let res = query_audit_log(deps.as_ref(), did.to_string(), None, None).unwrap();
        let actions: Vec<_> = res.entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::DocumentCreated,
                AuditAction::DocumentUpdated,
                AuditAction::GuardianAdded
            ]
        );
        assert_eq!(res.entries[1].data.get("note").unwrap(), "x");

        // limit 0 means everything
        let res = query_audit_log(deps.as_ref(), did.to_string(), None, Some(0)).unwrap();
        assert_eq!(3, res.entries.len());

        let res = query_audit_log(deps.as_ref(), did.to_string(), Some(1), Some(1)).unwrap();
        assert_eq!(1, res.entries.len());
        assert_eq!(3, res.entries[0].id);
    }

    #[test]
    fn counter_is_written_after_the_entry() {
        let mut storage = WriteLog::default();
        assert_eq!(1, log(&mut storage, "did:persona:abc", AuditAction::RecoveryProposed, Some(3)));

        assert_eq!(4, storage.writes.len());
        assert_eq!(b"next_audit_id".to_vec(), *storage.writes.last().unwrap());
        assert_eq!(Some(2), NEXT_AUDIT_ID.may_load(&storage).unwrap());
        assert!(AUDIT_LOG.has(&storage, 1));
    }

    #[test]
    fn proposal_entries_are_indexed() {
        let mut deps = mock_dependencies();
        log(&mut deps.storage, "did:persona:abc", AuditAction::RecoveryProposed, Some(7));
        log(&mut deps.storage, "did:persona:abc", AuditAction::GuardianAdded, None);
        log(&mut deps.storage, "did:persona:abc", AuditAction::RecoveryApproved, Some(7));

        let res = query_proposal_audit_log(deps.as_ref(), 7, None).unwrap();
        assert_eq!(2, res.entries.len());
        assert!(res.entries.iter().all(|e| e.proposal_id == Some(7)));
    }
}
