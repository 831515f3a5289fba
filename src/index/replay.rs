//! Rebuild the repository index from commit history.
//!
//! Commits arrive newest first, children before parents. HEAD decides which
//! buckets and flows exist and what their current snapshot is; older commits
//! only contribute the versions they recorded for buckets and flows that
//! still exist.
//!
//! A bucket or flow missing from some commit was deleted there (or did not
//! exist yet), so records about it in that commit's ancestors belong to an
//! earlier incarnation and are ignored. That knowledge is handed from each
//! commit to its parents only, so the other side of a merge still counts.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::index::metadata::BucketMetadata;
use crate::index::model::{Bucket, CurrentSnapshot, Flow, FlowPointer, RepositoryIndex};
use crate::storage::{BucketId, CommitId, CommitSnapshot, FlowId, StorageResult};

/// Replay `history` (newest commit first) into a fresh index.
///
/// The walk stops at the first commit whose tree holds no bucket records.
/// Storage errors from the history iterator abort the replay; bad records
/// are skipped with a warning.
pub fn replay<I>(history: I) -> StorageResult<RepositoryIndex>
where
    I: IntoIterator<Item = StorageResult<CommitSnapshot>>,
{
    let mut index = RepositoryIndex::new();
    let mut pending: HashMap<CommitId, Retired> = HashMap::new();
    let mut commits = 0usize;

    for (position, snapshot) in history.into_iter().enumerate() {
        let snapshot = snapshot?;
        if snapshot.records.is_empty() {
            debug!(commit = %snapshot.commit_id.short(), "no bucket records, history walk stops");
            break;
        }

        let mut retired = pending.remove(&snapshot.commit_id).unwrap_or_default();
        apply(&mut index, &snapshot, position == 0, &mut retired);
        for parent in &snapshot.parent_ids {
            pending.entry(*parent).or_default().extend(&retired);
        }
        commits += 1;
    }

    debug!(
        commits,
        buckets = index.len(),
        versions = index.version_count(),
        "replayed history"
    );
    Ok(index)
}

/// buckets and flows whose older records no longer count
#[derive(Debug, Default, Clone)]
struct Retired {
    buckets: HashSet<BucketId>,
    flows: HashSet<(BucketId, FlowId)>,
}

impl Retired {
    fn extend(&mut self, other: &Retired) {
        self.buckets.extend(other.buckets.iter().cloned());
        self.flows.extend(other.flows.iter().cloned());
    }
}

fn apply(index: &mut RepositoryIndex, snapshot: &CommitSnapshot, is_head: bool, retired: &mut Retired) {
    let (records, complete) = parse_records(snapshot);

    if is_head {
        create_from_head(index, &records);
    } else if complete {
        let present: HashSet<&BucketId> = records.iter().map(|(_, r)| &r.bucket_id).collect();
        for bucket in index.buckets() {
            if !present.contains(&bucket.id) {
                retired.buckets.insert(bucket.id.clone());
            }
        }
    }

    for (dir_name, record) in &records {
        if retired.buckets.contains(&record.bucket_id) {
            continue;
        }
        let Some(bucket) = index.bucket_mut(&record.bucket_id) else {
            continue;
        };
        if is_head && bucket.dir_name != *dir_name {
            continue;
        }

        if !is_head {
            for flow_id in bucket.flows.keys() {
                if !record.flows.contains_key(flow_id) {
                    retired.flows.insert((bucket.id.clone(), flow_id.clone()));
                }
            }
        }

        for (flow_id, entry) in &record.flows {
            if retired.flows.contains(&(bucket.id.clone(), flow_id.clone())) {
                continue;
            }
            let Some(flow) = bucket.flows.get_mut(flow_id) else {
                continue;
            };

            let Some(blob_id) = snapshot.snapshot_blob(dir_name, &entry.file) else {
                warn!(
                    commit = %snapshot.commit_id.short(),
                    path = %format!("{}/{}", dir_name, entry.file),
                    flow = %flow_id,
                    version = entry.ver,
                    "snapshot named in bucket record is missing from the tree"
                );
                continue;
            };

            match flow.versions.get_mut(&entry.ver) {
                // still recorded one commit further back, so that commit wrote it
                Some(pointer) if pointer.blob_id == blob_id => {
                    pointer.commit_id = snapshot.commit_id;
                }
                Some(_) => {}
                None => {
                    flow.versions.insert(
                        entry.ver,
                        FlowPointer {
                            file_name: entry.file.clone(),
                            commit_id: snapshot.commit_id,
                            blob_id,
                        },
                    );
                }
            }
        }
    }
}

fn create_from_head(index: &mut RepositoryIndex, records: &[(String, BucketMetadata)]) {
    for (dir_name, record) in records {
        if index.contains_bucket(&record.bucket_id) {
            warn!(
                bucket = %record.bucket_id,
                dir = %dir_name,
                "bucket id recorded in more than one directory, ignoring this one"
            );
            continue;
        }

        let mut bucket = Bucket::new(record.bucket_id.clone(), dir_name.clone());
        for (flow_id, entry) in &record.flows {
            let current = CurrentSnapshot {
                version: entry.ver,
                file_name: entry.file.clone(),
            };
            bucket.flows.insert(flow_id.clone(), Flow::new(flow_id.clone(), current));
        }
        index.insert_bucket(bucket);
    }
}

/// Parse every record in a commit. The flag is false when any record had to
/// be skipped, in which case absence from this commit proves nothing.
fn parse_records(snapshot: &CommitSnapshot) -> (Vec<(String, BucketMetadata)>, bool) {
    let mut complete = true;
    let mut parsed = Vec::with_capacity(snapshot.records.len());

    for record in &snapshot.records {
        match BucketMetadata::parse(&record.content) {
            Ok(metadata) => parsed.push((record.dir_name.clone(), metadata)),
            Err(e) => {
                complete = false;
                warn!(
                    commit = %snapshot.commit_id.short(),
                    dir = %record.dir_name,
                    error = %e,
                    "skipping unreadable bucket record"
                );
            }
        }
    }

    (parsed, complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobId, CommitId, RecordBlob, StorageError};
    use git2::{ObjectType, Oid};
    use std::collections::HashMap;

    fn commit_id(n: u8) -> CommitId {
        CommitId::new(Oid::hash_object(ObjectType::Commit, &[n]).unwrap())
    }

    fn blob_id(content: &str) -> BlobId {
        BlobId::new(Oid::hash_object(ObjectType::Blob, content.as_bytes()).unwrap())
    }

    fn record(dir: &str, bucket: &str, flows: &[(&str, u32, &str)]) -> RecordBlob {
        let mut yaml = format!("layoutVer: 1\nbucketId: {}\nflows:\n", bucket);
        if flows.is_empty() {
            yaml = format!("layoutVer: 1\nbucketId: {}\nflows: {{}}\n", bucket);
        }
        for (id, ver, file) in flows {
            yaml.push_str(&format!("  {}:\n    ver: {}\n    file: {}\n", id, ver, file));
        }
        RecordBlob {
            dir_name: dir.to_string(),
            content: yaml.into_bytes(),
        }
    }

    /// commit `n` on a linear history (parent `n - 1`)
    fn commit(n: u8, records: Vec<RecordBlob>, snapshots: &[(&str, &str)]) -> StorageResult<CommitSnapshot> {
        let parents = if n > 1 { vec![n - 1] } else { Vec::new() };
        commit_with_parents(n, &parents, records, snapshots)
    }

    fn commit_with_parents(
        n: u8,
        parents: &[u8],
        records: Vec<RecordBlob>,
        snapshots: &[(&str, &str)],
    ) -> StorageResult<CommitSnapshot> {
        let snapshots: HashMap<String, BlobId> = snapshots
            .iter()
            .map(|(path, content)| (path.to_string(), blob_id(content)))
            .collect();
        Ok(CommitSnapshot {
            commit_id: commit_id(n),
            parent_ids: parents.iter().map(|p| commit_id(*p)).collect(),
            records,
            snapshots,
        })
    }

    fn b(id: &str) -> BucketId {
        BucketId::new(id).unwrap()
    }

    fn f(id: &str) -> FlowId {
        FlowId::new(id).unwrap()
    }

    #[test]
    fn test_empty_history() {
        let index = replay(Vec::new()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_versions_collected_across_commits() {
        // newest first: v3, v2, v1 of the same flow
        let history = vec![
            commit(3, vec![record("B", "b1", &[("f1", 3, "F.snapshot")])], &[("B/F.snapshot", "three")]),
            commit(2, vec![record("B", "b1", &[("f1", 2, "F.snapshot")])], &[("B/F.snapshot", "two")]),
            commit(1, vec![record("B", "b1", &[("f1", 1, "F.snapshot")])], &[("B/F.snapshot", "one")]),
        ];
        let index = replay(history).unwrap();

        let flow = index.find_flow(&b("b1"), &f("f1")).unwrap();
        assert_eq!(flow.version_numbers(), vec![1, 2, 3]);
        assert_eq!(flow.current.version, 3);
        assert_eq!(flow.version(1).unwrap().blob_id, blob_id("one"));
        assert_eq!(flow.version(1).unwrap().commit_id, commit_id(1));
        assert_eq!(flow.version(3).unwrap().commit_id, commit_id(3));
    }

    #[test]
    fn test_pointer_keeps_writing_commit() {
        // commit 2 only touched another flow; f1 v1 was written by commit 1
        let history = vec![
            commit(
                2,
                vec![record("B", "b1", &[("f1", 1, "F.snapshot"), ("f2", 1, "G.snapshot")])],
                &[("B/F.snapshot", "one"), ("B/G.snapshot", "g")],
            ),
            commit(1, vec![record("B", "b1", &[("f1", 1, "F.snapshot")])], &[("B/F.snapshot", "one")]),
        ];
        let index = replay(history).unwrap();

        let pointer = index.find_version(&b("b1"), &f("f1"), 1).unwrap();
        assert_eq!(pointer.commit_id, commit_id(1));
        let pointer = index.find_version(&b("b1"), &f("f2"), 1).unwrap();
        assert_eq!(pointer.commit_id, commit_id(2));
    }

    #[test]
    fn test_head_decides_directory_after_rename() {
        let history = vec![
            commit(2, vec![record("New Name", "b1", &[("f1", 2, "F.snapshot")])], &[("New Name/F.snapshot", "two")]),
            commit(1, vec![record("Old Name", "b1", &[("f1", 1, "F.snapshot")])], &[("Old Name/F.snapshot", "one")]),
        ];
        let index = replay(history).unwrap();

        let bucket = index.bucket(&b("b1")).unwrap();
        assert_eq!(bucket.dir_name, "New Name");
        // v1 resolved through the directory it had at its own commit
        assert_eq!(
            index.find_version(&b("b1"), &f("f1"), 1).unwrap().blob_id,
            blob_id("one")
        );
    }

    #[test]
    fn test_deleted_bucket_and_flow_not_resurrected() {
        let history = vec![
            commit(2, vec![record("B", "b1", &[("f1", 1, "F.snapshot")])], &[("B/F.snapshot", "one")]),
            commit(
                1,
                vec![
                    record("B", "b1", &[("f1", 1, "F.snapshot"), ("gone", 4, "Gone.snapshot")]),
                    record("C", "b2", &[("f9", 1, "X.snapshot")]),
                ],
                &[("B/F.snapshot", "one"), ("B/Gone.snapshot", "g"), ("C/X.snapshot", "x")],
            ),
        ];
        let index = replay(history).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.bucket(&b("b2")).is_none());
        assert!(index.find_flow(&b("b1"), &f("gone")).is_err());
    }

    #[test]
    fn test_recreated_flow_ignores_earlier_incarnation() {
        // f1 v3 existed, was deleted (commit 2 has no f1), then re-saved as v1
        let history = vec![
            commit(3, vec![record("B", "b1", &[("f1", 1, "F.snapshot"), ("f2", 1, "G.snapshot")])],
                &[("B/F.snapshot", "new"), ("B/G.snapshot", "g")]),
            commit(2, vec![record("B", "b1", &[("f2", 1, "G.snapshot")])], &[("B/G.snapshot", "g")]),
            commit(1, vec![record("B", "b1", &[("f1", 3, "F.snapshot"), ("f2", 1, "G.snapshot")])],
                &[("B/F.snapshot", "old"), ("B/G.snapshot", "g")]),
        ];
        let index = replay(history).unwrap();

        let flow = index.find_flow(&b("b1"), &f("f1")).unwrap();
        assert_eq!(flow.version_numbers(), vec![1]);
        assert_eq!(index.find_version(&b("b1"), &f("f2"), 1).unwrap().commit_id, commit_id(1));
    }

    #[test]
    fn test_other_side_of_merge_still_counts() {
        // 1 <- 2 <- 3 on one side adds bucket C; 1 <- 4 on the other never had it;
        // 5 merges 4 and 3
        let history = vec![
            commit_with_parents(
                5,
                &[4, 3],
                vec![
                    record("B", "b1", &[("f1", 1, "F.snapshot"), ("f3", 1, "H.snapshot")]),
                    record("C", "b2", &[("f2", 2, "G.snapshot")]),
                ],
                &[("B/F.snapshot", "one"), ("B/H.snapshot", "h"), ("C/G.snapshot", "g2")],
            ),
            commit_with_parents(
                4,
                &[1],
                vec![record("B", "b1", &[("f1", 1, "F.snapshot"), ("f3", 1, "H.snapshot")])],
                &[("B/F.snapshot", "one"), ("B/H.snapshot", "h")],
            ),
            commit_with_parents(
                3,
                &[2],
                vec![record("B", "b1", &[("f1", 1, "F.snapshot")]), record("C", "b2", &[("f2", 2, "G.snapshot")])],
                &[("B/F.snapshot", "one"), ("C/G.snapshot", "g2")],
            ),
            commit_with_parents(
                2,
                &[1],
                vec![record("B", "b1", &[("f1", 1, "F.snapshot")]), record("C", "b2", &[("f2", 1, "G.snapshot")])],
                &[("B/F.snapshot", "one"), ("C/G.snapshot", "g1")],
            ),
            commit_with_parents(1, &[], vec![record("B", "b1", &[("f1", 1, "F.snapshot")])], &[("B/F.snapshot", "one")]),
        ];
        let index = replay(history).unwrap();

        let flow = index.find_flow(&b("b2"), &f("f2")).unwrap();
        assert_eq!(flow.version_numbers(), vec![1, 2]);
        assert_eq!(flow.version(2).unwrap().commit_id, commit_id(3));
        assert_eq!(index.find_version(&b("b1"), &f("f1"), 1).unwrap().commit_id, commit_id(1));
        assert_eq!(index.find_version(&b("b1"), &f("f3"), 1).unwrap().commit_id, commit_id(4));
    }

    #[test]
    fn test_walk_stops_at_commit_without_records() {
        let history = vec![
            commit(3, vec![record("B", "b1", &[("f1", 2, "F.snapshot")])], &[("B/F.snapshot", "two")]),
            commit(2, Vec::new(), &[]),
            commit(1, vec![record("B", "b1", &[("f1", 1, "F.snapshot")])], &[("B/F.snapshot", "one")]),
        ];
        let index = replay(history).unwrap();
        assert_eq!(index.find_flow(&b("b1"), &f("f1")).unwrap().version_numbers(), vec![2]);
    }

    #[test]
    fn test_walk_stops_before_reading_older_commits() {
        let history = vec![
            commit(2, Vec::new(), &[]),
            Err(StorageError::Internal("should not be reached".into())),
        ];
        assert!(replay(history).unwrap().is_empty());
    }

    #[test]
    fn test_bad_records_skipped() {
        let broken = RecordBlob {
            dir_name: "Broken".into(),
            content: b"layoutVer: 9\nbucketId: b9\nflows: {}\n".to_vec(),
        };
        let garbage = RecordBlob {
            dir_name: "Garbage".into(),
            content: b"{{{{".to_vec(),
        };
        let history = vec![
            commit(2, vec![record("B", "b1", &[("f1", 2, "F.snapshot")]), broken], &[("B/F.snapshot", "two")]),
            // b1's record is unreadable here; that must not hide v1
            commit(1, vec![garbage, record("B", "b1", &[("f1", 1, "F.snapshot")])], &[("B/F.snapshot", "one")]),
        ];
        let index = replay(history).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.find_flow(&b("b1"), &f("f1")).unwrap().version_numbers(), vec![1, 2]);
    }

    #[test]
    fn test_missing_snapshot_blob_skipped() {
        let history = vec![
            commit(2, vec![record("B", "b1", &[("f1", 2, "F.snapshot")])], &[("B/F.snapshot", "two")]),
            commit(1, vec![record("B", "b1", &[("f1", 1, "Lost.snapshot")])], &[]),
        ];
        let index = replay(history).unwrap();
        assert_eq!(index.find_flow(&b("b1"), &f("f1")).unwrap().version_numbers(), vec![2]);
    }

    #[test]
    fn test_storage_error_propagates() {
        let history = vec![
            commit(2, vec![record("B", "b1", &[("f1", 2, "F.snapshot")])], &[("B/F.snapshot", "two")]),
            Err(StorageError::Internal("walk failed".into())),
        ];
        assert!(matches!(replay(history), Err(StorageError::Internal(_))));
    }
}
