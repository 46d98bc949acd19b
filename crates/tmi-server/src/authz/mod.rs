//! Role resolution for a principal over a threat model, plus the owner
//! transfer / security-reviewer / writer-limitation rules.

use uuid::Uuid;

use crate::error::ApiError;
use crate::model::{AuthorizationEntry, Principal, Role, ThreatModel, EVERYONE_ID};

/// Resolved by checking direct user match, group membership, and the
/// "everyone" pseudo-group; highest role wins.
pub fn resolve_role(user_id: Uuid, user_groups: &[Uuid], tm: &ThreatModel) -> Option<Role> {
    let mut best: Option<Role> = None;
    for entry in &tm.authorization {
        let matches = match &entry.principal {
            Principal::User { id, .. } => *id == user_id,
            Principal::Group { id } => user_groups.contains(id),
            Principal::Everyone => true,
        };
        if matches {
            best = Some(match best {
                Some(current) if current >= entry.role => current,
                _ => entry.role,
            });
        }
    }
    best
}

pub fn check_resource_access(user_id: Uuid, user_groups: &[Uuid], tm: &ThreatModel, required: Role) -> bool {
    resolve_role(user_id, user_groups, tm).is_some_and(|r| r.at_least(required))
}

/// Applies a PUT/PATCH that changes `owner`. Only the current owner may
/// transfer ownership; the prior owner is retained with role `owner`.
pub fn apply_owner_transfer(
    current_user: Uuid,
    tm: &mut ThreatModel,
    new_owner: Principal,
) -> Result<(), ApiError> {
    if tm.owner.identity() != current_user {
        return Err(ApiError::Forbidden("only the current owner may transfer ownership".to_string()));
    }
    let prior_owner = tm.owner.clone();
    tm.owner = new_owner;
    if !tm.authorization.iter().any(|e| e.principal.identity() == prior_owner.identity()) {
        tm.authorization.push(AuthorizationEntry { principal: prior_owner, role: Role::Owner });
    }
    if !tm.authorization.iter().any(|e| e.principal.identity() == tm.owner.identity() && e.role == Role::Owner) {
        tm.authorization.push(AuthorizationEntry { principal: tm.owner.clone(), role: Role::Owner });
    }
    reject_duplicate_principals(&tm.authorization)?;
    Ok(())
}

pub fn reject_duplicate_principals(entries: &[AuthorizationEntry]) -> Result<(), ApiError> {
    let mut seen = std::collections::HashSet::new();
    for e in entries {
        if !seen.insert(e.principal.identity()) {
            return Err(ApiError::InvalidInput("Duplicate authorization subject".to_string()));
        }
    }
    Ok(())
}

/// Validates a PATCH replacing `/authorization`. A replacement that would
/// remove the designated reviewer, or demote them below owner, fails with
/// `security_reviewer_conflict` unless the same PATCH first clears the
/// reviewer.
pub fn validate_authorization_patch(
    security_reviewer: Option<Uuid>,
    new_security_reviewer: Option<Uuid>,
    new_authorization: &[AuthorizationEntry],
) -> Result<(), ApiError> {
    reject_duplicate_principals(new_authorization)?;
    // Clearing the reviewer in the same patch releases the lock.
    if new_security_reviewer.is_none() {
        return Ok(());
    }
    if let Some(reviewer) = security_reviewer {
        let still_owner = new_authorization
            .iter()
            .any(|e| e.principal.identity() == reviewer && e.role == Role::Owner);
        if !still_owner {
            return Err(ApiError::Conflict("security_reviewer_conflict".to_string()));
        }
    }
    Ok(())
}

/// Writers may mutate any field except `owner` and `authorization`; attempts
/// are 403. `security_reviewer` designates a role within `authorization` and
/// travels under the same protection. Compares the submitted values against
/// the loaded record rather than trusting field presence in the request, so
/// a writer resubmitting the unchanged owner/authorization/reviewer still
/// passes.
pub fn guard_owner_only_fields(
    role: Role,
    tm: &ThreatModel,
    new_owner: Option<&Principal>,
    new_authorization: &[AuthorizationEntry],
    new_security_reviewer: Option<Uuid>,
) -> Result<(), ApiError> {
    if role == Role::Owner {
        return Ok(());
    }
    let owner_changed = new_owner.is_some_and(|o| o.identity() != tm.owner.identity());
    let authorization_changed = new_authorization != tm.authorization.as_slice();
    let reviewer_changed = new_security_reviewer != tm.security_reviewer;
    if owner_changed || authorization_changed || reviewer_changed {
        return Err(ApiError::Forbidden(
            "writers may not modify owner, authorization, or security_reviewer".to_string(),
        ));
    }
    Ok(())
}

/// Adding or removing members of "everyone" is always rejected.
pub fn reject_everyone_membership_mutation(principal_id: Uuid) -> Result<(), ApiError> {
    if principal_id == EVERYONE_ID {
        return Err(ApiError::Forbidden("cannot mutate membership of the everyone pseudo-group".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user_principal(id: Uuid) -> Principal {
        Principal::User { id, provider: "local".into(), provider_id: id.to_string() }
    }

    fn sample_tm(owner_id: Uuid) -> ThreatModel {
        ThreatModel {
            id: Uuid::new_v4(),
            name: "tm".into(),
            description: None,
            framework: "STRIDE".into(),
            owner: user_principal(owner_id),
            authorization: vec![AuthorizationEntry { principal: user_principal(owner_id), role: Role::Owner }],
            security_reviewer: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            created_by: owner_id,
            project_id: None,
        }
    }

    #[test]
    fn owner_transfer_preserves_prior_owner() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut tm = sample_tm(alice);
        apply_owner_transfer(alice, &mut tm, user_principal(bob)).unwrap();
        assert_eq!(tm.owner.identity(), bob);
        assert!(tm.authorization.iter().any(|e| e.principal.identity() == alice && e.role == Role::Owner));
        assert!(tm.authorization.iter().any(|e| e.principal.identity() == bob && e.role == Role::Owner));
    }

    #[test]
    fn non_owner_cannot_transfer() {
        let alice = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        let mut tm = sample_tm(alice);
        let err = apply_owner_transfer(mallory, &mut tm, user_principal(mallory)).unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[test]
    fn security_reviewer_protection_blocks_removal() {
        let reviewer = Uuid::new_v4();
        let new_auth = vec![AuthorizationEntry { principal: user_principal(Uuid::new_v4()), role: Role::Owner }];
        let err = validate_authorization_patch(Some(reviewer), Some(reviewer), &new_auth).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn clearing_reviewer_releases_lock() {
        let reviewer = Uuid::new_v4();
        let new_auth = vec![AuthorizationEntry { principal: user_principal(Uuid::new_v4()), role: Role::Owner }];
        assert!(validate_authorization_patch(Some(reviewer), None, &new_auth).is_ok());
    }

    #[test]
    fn everyone_group_cannot_be_mutated() {
        assert!(reject_everyone_membership_mutation(EVERYONE_ID).is_err());
        assert!(reject_everyone_membership_mutation(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn writer_cannot_escalate_via_authorization_replacement() {
        let owner = Uuid::new_v4();
        let writer = Uuid::new_v4();
        let mut tm = sample_tm(owner);
        tm.authorization.push(AuthorizationEntry { principal: user_principal(writer), role: Role::Writer });
        let escalated = vec![
            AuthorizationEntry { principal: user_principal(owner), role: Role::Owner },
            AuthorizationEntry { principal: user_principal(writer), role: Role::Owner },
        ];
        let err = guard_owner_only_fields(Role::Writer, &tm, None, &escalated, None).unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[test]
    fn writer_resubmitting_unchanged_authorization_passes() {
        let owner = Uuid::new_v4();
        let tm = sample_tm(owner);
        let unchanged = tm.authorization.clone();
        assert!(guard_owner_only_fields(Role::Writer, &tm, None, &unchanged, tm.security_reviewer).is_ok());
    }

    #[test]
    fn owner_may_replace_authorization_freely() {
        let owner = Uuid::new_v4();
        let tm = sample_tm(owner);
        let new_auth = vec![AuthorizationEntry { principal: user_principal(Uuid::new_v4()), role: Role::Writer }];
        assert!(guard_owner_only_fields(Role::Owner, &tm, None, &new_auth, None).is_ok());
    }

    #[test]
    fn highest_role_wins_across_user_and_group() {
        let user_id = Uuid::new_v4();
        let group_id = Uuid::new_v4();
        let mut tm = sample_tm(Uuid::new_v4());
        tm.authorization.push(AuthorizationEntry { principal: user_principal(user_id), role: Role::Reader });
        tm.authorization.push(AuthorizationEntry { principal: Principal::Group { id: group_id }, role: Role::Writer });
        let role = resolve_role(user_id, &[group_id], &tm).unwrap();
        assert_eq!(role, Role::Writer);
    }
}
