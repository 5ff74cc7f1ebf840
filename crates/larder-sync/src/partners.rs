//! Partnership trust state machine over directed partner-request edges.
//!
//! Per ordered account pair there is at most one edge; a pair is "active"
//! once an edge in either direction is approved. Requesting while the
//! reverse request is pending collapses the pair into a single approved
//! edge instead of creating a second one. All lookups are recomputed from
//! the edge set on every call.

use thiserror::Error;
use tracing::info;

use larder_db::models::{EdgeRow, UserRow};
use larder_db::{Database, StoreError};

/// Every rejection carries a stable machine-readable code so calling
/// tooling can branch on it instead of parsing messages.
#[derive(Debug, Error)]
pub enum PartnerError {
    #[error("no user with that partner code")]
    NoSuchUser,
    #[error("cannot partner with yourself")]
    CannotPartnerSelf,
    #[error("request already sent")]
    AlreadyRequested,
    #[error("already partners")]
    AlreadyPartners,
    #[error("no pending request from that user")]
    NoSuchRequest,
    #[error("request is already approved")]
    AlreadyApproved,
    #[error("partnership is still pending")]
    StillPending,
    #[error("no such partner")]
    NoSuchPartner,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PartnerError {
    pub fn code(&self) -> &'static str {
        match self {
            PartnerError::NoSuchUser => "no_such_user",
            PartnerError::CannotPartnerSelf => "cannot_partner_self",
            PartnerError::AlreadyRequested => "already_requested",
            PartnerError::AlreadyPartners => "already_partners",
            PartnerError::NoSuchRequest => "no_such_request",
            PartnerError::AlreadyApproved => "already_approved",
            PartnerError::StillPending => "still_pending",
            PartnerError::NoSuchPartner => "no_such_partner",
            PartnerError::Store(_) => "internal_error",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A fresh unapproved edge now points at the target.
    Requested,
    /// The reverse request was pending; the pair is now approved.
    Approved,
}

/// Request a partnership with the owner of `partner_code`.
pub fn request_partner(
    db: &Database,
    me: &UserRow,
    partner_code: &str,
) -> Result<RequestOutcome, PartnerError> {
    let target = db
        .get_user_by_partner_code(partner_code)?
        .ok_or(PartnerError::NoSuchUser)?;
    if target.id == me.id {
        return Err(PartnerError::CannotPartnerSelf);
    }

    // Simultaneous mutual requests collapse into one approval.
    if let Some(reverse) = db.get_edge(&target.id, &me.id)? {
        if reverse.approved {
            return Err(PartnerError::AlreadyPartners);
        }
        db.approve_edge(&target.id, &me.id)?;
        info!("Mutual partner request {} <-> {} auto-approved", me.id, target.id);
        return Ok(RequestOutcome::Approved);
    }

    if let Some(forward) = db.get_edge(&me.id, &target.id)? {
        return Err(if forward.approved {
            PartnerError::AlreadyPartners
        } else {
            PartnerError::AlreadyRequested
        });
    }

    db.insert_edge(&me.id, &target.id)?;
    info!("Partner request {} -> {}", me.id, target.id);
    Ok(RequestOutcome::Requested)
}

/// Approve a pending incoming request from `other_id`.
pub fn approve_partner(db: &Database, me: &UserRow, other_id: &str) -> Result<(), PartnerError> {
    let edge = db.get_edge(other_id, &me.id)?.ok_or(PartnerError::NoSuchRequest)?;
    if edge.approved {
        return Err(PartnerError::AlreadyApproved);
    }
    db.approve_edge(other_id, &me.id)?;
    info!("Partner request {} -> {} approved", other_id, me.id);
    Ok(())
}

/// Dissolve an active partnership in either direction.
pub fn remove_active_partner(
    db: &Database,
    me: &UserRow,
    other_id: &str,
) -> Result<(), PartnerError> {
    let edge = edge_between(db, &me.id, other_id)?.ok_or(PartnerError::NoSuchPartner)?;
    if !edge.approved {
        return Err(PartnerError::StillPending);
    }
    db.delete_edge(&edge.source_id, &edge.target_id)?;
    info!("Partnership {} <-> {} removed", me.id, other_id);
    Ok(())
}

/// Withdraw a pending request; covers both rejecting an incoming one and
/// cancelling an outgoing one.
pub fn remove_pending_partner(
    db: &Database,
    me: &UserRow,
    other_id: &str,
) -> Result<(), PartnerError> {
    let edge = edge_between(db, &me.id, other_id)?.ok_or(PartnerError::NoSuchRequest)?;
    if edge.approved {
        return Err(PartnerError::AlreadyApproved);
    }
    db.delete_edge(&edge.source_id, &edge.target_id)?;
    info!("Pending partnership {} <-> {} removed", me.id, other_id);
    Ok(())
}

fn edge_between(db: &Database, a: &str, b: &str) -> Result<Option<EdgeRow>, StoreError> {
    if let Some(edge) = db.get_edge(a, b)? {
        return Ok(Some(edge));
    }
    db.get_edge(b, a)
}
