//! Generic set-diff engine shared by all record kinds.
//!
//! Given the locally-known collection and a freshly fetched listing, compute
//! which records to create, update and delete. The comparator decides
//! whether a common record changed; the expand hook turns a listing entry
//! into the full payload (for recipes this is a second network fetch, for
//! categories and photos it is a plain conversion). The engine mutates
//! nothing; applying the diff is the caller's job so a whole kind can
//! commit atomically.

use std::collections::HashMap;
use std::future::Future;

use futures_util::{StreamExt, TryStreamExt, stream};
use serde_json::Value;

use larder_db::models::RecordRow;

use crate::error::SyncError;

/// Upper bound on concurrent per-record fetches within one reconcile.
pub const MAX_PARALLEL_FETCHES: usize = 8;

/// The three disjoint outcome sets of a reconcile. `created` carries the
/// expanded payload keyed by uid, `updated` pairs the existing row with its
/// replacement payload, `deleted` holds rows gone from the listing.
#[derive(Debug, Default)]
pub struct Diff {
    pub created: Vec<(String, Value)>,
    pub updated: Vec<(RecordRow, Value)>,
    pub deleted: Vec<RecordRow>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Diff `current` against `incoming`.
///
/// Records absent from `incoming` are deleted; there is no tombstoning,
/// absence means deletion. A duplicate uid within `incoming` resolves to
/// the later occurrence (last write wins within the batch). `expand` runs
/// only for new records and for common records the comparator reports as
/// changed, concurrently up to [`MAX_PARALLEL_FETCHES`]; its failure aborts
/// the whole reconcile of this kind.
pub async fn reconcile<R, F, Fut>(
    current: Vec<RecordRow>,
    incoming: Vec<R>,
    uid_of: impl Fn(&R) -> &str,
    is_changed: impl Fn(&RecordRow, &R) -> bool,
    expand: F,
) -> Result<Diff, SyncError>
where
    F: Fn(R) -> Fut,
    Fut: Future<Output = Result<Value, SyncError>>,
{
    let current_by_uid: HashMap<String, RecordRow> =
        current.into_iter().map(|row| (row.uid.clone(), row)).collect();

    let mut incoming_by_uid: HashMap<String, R> = HashMap::new();
    for item in incoming {
        incoming_by_uid.insert(uid_of(&item).to_string(), item);
    }

    let mut deleted = Vec::new();
    let mut kept: HashMap<String, RecordRow> = HashMap::new();
    for (uid, row) in current_by_uid {
        if incoming_by_uid.contains_key(&uid) {
            kept.insert(uid, row);
        } else {
            deleted.push(row);
        }
    }

    // Pair each remaining incoming entry with its existing row, keeping only
    // the ones that need an expand: brand new uids, and common uids whose
    // comparator fired. Unchanged records are a no-op.
    let mut work: Vec<(R, Option<RecordRow>)> = Vec::new();
    for (uid, item) in incoming_by_uid {
        match kept.remove(&uid) {
            Some(old) => {
                if is_changed(&old, &item) {
                    work.push((item, Some(old)));
                }
            }
            None => work.push((item, None)),
        }
    }

    let expanded: Vec<(Option<RecordRow>, String, Value)> =
        stream::iter(work.into_iter().map(|(item, old)| {
            let uid = uid_of(&item).to_string();
            let fut = expand(item);
            async move { fut.await.map(|value| (old, uid, value)) }
        }))
        .buffer_unordered(MAX_PARALLEL_FETCHES)
        .try_collect()
        .await?;

    let mut diff = Diff {
        deleted,
        ..Default::default()
    };
    for (old, uid, value) in expanded {
        match old {
            Some(old) => diff.updated.push((old, value)),
            None => diff.created.push((uid, value)),
        }
    }
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_remote::RemoteError;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Entry {
        uid: &'static str,
        hash: &'static str,
    }

    fn entry(uid: &'static str, hash: &'static str) -> Entry {
        Entry { uid, hash }
    }

    fn row(id: i64, uid: &str, hash: &str) -> RecordRow {
        RecordRow {
            id,
            uid: uid.to_string(),
            data: json!({"uid": uid, "hash": hash}),
        }
    }

    async fn run(current: Vec<RecordRow>, incoming: Vec<Entry>) -> Diff {
        reconcile(
            current,
            incoming,
            |e| e.uid,
            |old, new| old.hash() != Some(new.hash),
            |e| async move { Ok(json!({"uid": e.uid, "hash": e.hash})) },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn partitions_keys_into_disjoint_sets() {
        let current = vec![row(1, "A", "a1"), row(2, "B", "b1"), row(3, "C", "c1")];
        // A unchanged, B changed, C gone, D new
        let incoming = vec![entry("A", "a1"), entry("B", "b2"), entry("D", "d1")];

        let diff = run(current, incoming).await;

        let created: HashSet<_> = diff.created.iter().map(|(uid, _)| uid.as_str()).collect();
        let updated: HashSet<_> = diff.updated.iter().map(|(old, _)| old.uid.as_str()).collect();
        let deleted: HashSet<_> = diff.deleted.iter().map(|r| r.uid.as_str()).collect();

        assert_eq!(created, HashSet::from(["D"]));
        assert_eq!(updated, HashSet::from(["B"]));
        assert_eq!(deleted, HashSet::from(["C"]));
        // disjoint by construction
        assert!(created.is_disjoint(&updated));
        assert!(created.is_disjoint(&deleted));
        assert!(updated.is_disjoint(&deleted));
    }

    #[tokio::test]
    async fn second_pass_is_a_noop() {
        let current = vec![row(1, "A", "a1"), row(2, "B", "b1")];
        let incoming = vec![entry("A", "a2"), entry("C", "c1")];

        let diff = run(current, incoming.clone()).await;
        assert!(!diff.is_empty());

        // Simulate the caller applying the diff, then reconcile again.
        let mut next: Vec<RecordRow> = Vec::new();
        let mut next_id = 10;
        for (old, data) in &diff.updated {
            next.push(RecordRow {
                id: old.id,
                uid: old.uid.clone(),
                data: data.clone(),
            });
        }
        for (uid, data) in &diff.created {
            next.push(RecordRow {
                id: next_id,
                uid: uid.clone(),
                data: data.clone(),
            });
            next_id += 1;
        }

        let diff = run(next, incoming).await;
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn later_duplicate_wins_within_the_batch() {
        let incoming = vec![entry("A", "old"), entry("A", "new")];
        let diff = run(Vec::new(), incoming).await;

        assert_eq!(diff.created.len(), 1);
        assert_eq!(diff.created[0].1["hash"], "new");
    }

    #[tokio::test]
    async fn unchanged_records_never_expand() {
        let calls = AtomicUsize::new(0);
        let current = vec![row(1, "A", "same"), row(2, "B", "old")];
        let incoming = vec![entry("A", "same"), entry("B", "new")];

        let diff = reconcile(
            current,
            incoming,
            |e| e.uid,
            |old, new| old.hash() != Some(new.hash),
            |e| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(json!({"uid": e.uid, "hash": e.hash})) }
            },
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "only the changed record expands");
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].0.uid, "B");
    }

    #[tokio::test]
    async fn expand_failure_aborts_the_kind() {
        let result = reconcile(
            Vec::new(),
            vec![entry("A", "a1")],
            |e| e.uid,
            |_, _| true,
            |_| async { Err(SyncError::Remote(RemoteError::NotFound)) },
        )
        .await;
        assert!(result.is_err());
    }
}
