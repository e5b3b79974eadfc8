//! End-of-run ref emission: writes, append-namespace transfers, pruning.
//!
//! Ref updates are deferred until every commit is durable, then applied in
//! one `update-ref --stdin` batch.

use std::collections::{HashMap, HashSet};

use crate::errors::GitError;
use crate::git::{GitRepo, RefUpdate};
use crate::oid::ObjectId;

/// Write the produced refs, fold an `--append-to-refs` namespace back into
/// canonical namespaces, and prune stale refs. Returns the number of refs
/// written or updated.
pub fn finalize(
    repo: &GitRepo,
    produced: &[(String, ObjectId)],
    consumed_append_refs: &[String],
    append_namespaces: &[String],
    prune_namespaces: &[String],
) -> Result<usize, GitError> {
    let mut updates: Vec<RefUpdate> = Vec::new();
    let mut final_set: HashMap<String, ObjectId> = HashMap::new();

    for (refname, id) in produced {
        // Later entries win; the mapper guarantees distinct sources get
        // distinct names.
        final_set.insert(refname.clone(), *id);
    }

    // Leftover refs under each append namespace move to their canonical
    // name unless this run produced that name; the namespace itself is
    // cleared either way.
    let consumed: HashSet<&str> = consumed_append_refs.iter().map(|s| s.as_str()).collect();
    for ns in append_namespaces {
        let ns = ns.trim_end_matches('/');
        let prefix = format!("{}/", ns);
        for (refname, id) in repo.for_each_ref(&prefix)? {
            if !consumed.contains(refname.as_str()) {
                if let Some(suffix) = refname.strip_prefix(&prefix) {
                    let canonical = format!("refs/{}", suffix);
                    final_set.entry(canonical).or_insert(id);
                }
            }
            updates.push(RefUpdate::Delete { refname });
        }
    }

    for (refname, id) in &final_set {
        updates.push(RefUpdate::Update {
            refname: refname.clone(),
            id: *id,
        });
    }

    // Prune: anything in a selected namespace that this run did not
    // produce goes away.
    for ns in prune_namespaces {
        let prefix = format!("refs/{}", ns);
        for (refname, _) in repo.for_each_ref(&prefix)? {
            if !final_set.contains_key(&refname) {
                updates.push(RefUpdate::Delete { refname });
            }
        }
    }

    let written = final_set.len();
    repo.update_refs(&updates)?;
    Ok(written)
}
