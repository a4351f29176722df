//! Duplicate grouping
//!
//! Two passes over the healthy set: exact content-hash groups first, then
//! an acoustic pass that buckets the remainder by coarse duration and
//! unions fingerprint pairs above the similarity threshold. Singletons
//! create no group rows. Primary election is the total order from the
//! scoring module, so the same inputs always elect the same primary.

use crate::config::CleanupConfig;
use crate::db::duplicates;
use crate::error::CleanupError;
use crate::extractors::Fingerprinter;
use crate::models::GroupKeyKind;
use crate::services::scoring::{self, PrimaryCandidate};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything grouping needs to know about one healthy file
#[derive(Debug, Clone)]
pub struct GroupCandidate {
    pub file_id: i64,
    pub path: String,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub final_score: f64,
    pub fingerprint: Option<String>,
    pub duration_sec: Option<f64>,
    pub codec: Option<String>,
    pub bitrate_kbps: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GroupingOutcome {
    pub groups_created: usize,
    pub files_grouped: usize,
}

/// Union-find with path compression for the acoustic pass
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

pub struct DuplicateGrouper {
    db: SqlitePool,
    fingerprinter: Arc<dyn Fingerprinter>,
    similarity_threshold: f64,
    format_priority: Vec<String>,
}

impl DuplicateGrouper {
    pub fn new(db: SqlitePool, fingerprinter: Arc<dyn Fingerprinter>, config: &CleanupConfig) -> Self {
        Self {
            db,
            fingerprinter,
            similarity_threshold: config.duplicate_similarity_threshold,
            format_priority: config.format_priority.clone(),
        }
    }

    /// Group every healthy file, persisting groups and members. Returns
    /// how much was grouped; singletons pass through untouched.
    pub async fn group_healthy_files(&self) -> Result<GroupingOutcome, CleanupError> {
        let candidates = self.load_healthy_candidates().await?;
        tracing::info!(healthy = candidates.len(), "grouping healthy files");

        let mut outcome = GroupingOutcome::default();
        let mut placed: Vec<bool> = vec![false; candidates.len()];

        // Pass 1: exact content hash
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            if let Some(hash) = candidate.content_hash.as_deref() {
                by_hash.entry(hash).or_default().push(idx);
            }
        }

        let mut hash_groups: Vec<(&str, Vec<usize>)> = by_hash
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .collect();
        hash_groups.sort_by_key(|(hash, _)| hash.to_string());

        for (hash, members) in hash_groups {
            for &idx in &members {
                placed[idx] = true;
            }
            self.persist_group(GroupKeyKind::Hash, hash, &members, &candidates, |_, _| 1.0)
                .await?;
            outcome.groups_created += 1;
            outcome.files_grouped += members.len();
        }

        // Pass 2: acoustic similarity on the rest
        if self.fingerprinter.is_enabled() {
            let acoustic: Vec<usize> = (0..candidates.len())
                .filter(|&i| {
                    !placed[i]
                        && candidates[i].fingerprint.is_some()
                        && candidates[i].duration_sec.is_some()
                })
                .collect();

            let mut buckets: HashMap<i64, Vec<usize>> = HashMap::new();
            for &idx in &acoustic {
                let seconds = candidates[idx].duration_sec.unwrap_or(0.0).round() as i64;
                buckets.entry(seconds).or_default().push(idx);
            }

            let mut uf = UnionFind::new(candidates.len());
            for bucket in buckets.values() {
                for (i, &a) in bucket.iter().enumerate() {
                    for &b in &bucket[i + 1..] {
                        let fp_a = candidates[a].fingerprint.as_deref().unwrap_or_default();
                        let fp_b = candidates[b].fingerprint.as_deref().unwrap_or_default();
                        if self.fingerprinter.similarity(fp_a, fp_b) >= self.similarity_threshold {
                            uf.union(a, b);
                        }
                    }
                }
            }

            let mut classes: HashMap<usize, Vec<usize>> = HashMap::new();
            for &idx in &acoustic {
                classes.entry(uf.find(idx)).or_default().push(idx);
            }

            let mut acoustic_groups: Vec<Vec<usize>> = classes
                .into_values()
                .filter(|members| members.len() >= 2)
                .collect();
            acoustic_groups.sort_by_key(|members| {
                members
                    .iter()
                    .map(|&i| candidates[i].file_id)
                    .min()
                    .unwrap_or(0)
            });

            for members in acoustic_groups {
                // Key the group by the lexicographically smallest member fingerprint
                let key = members
                    .iter()
                    .filter_map(|&i| candidates[i].fingerprint.as_deref())
                    .min()
                    .unwrap_or_default()
                    .to_string();

                self.persist_group(GroupKeyKind::Fingerprint, &key, &members, &candidates, |member, primary| {
                    self.fingerprinter.similarity(
                        member.fingerprint.as_deref().unwrap_or_default(),
                        primary.fingerprint.as_deref().unwrap_or_default(),
                    )
                })
                .await?;
                outcome.groups_created += 1;
                outcome.files_grouped += members.len();
            }
        }

        tracing::info!(
            groups = outcome.groups_created,
            grouped_files = outcome.files_grouped,
            "duplicate grouping complete"
        );
        Ok(outcome)
    }

    /// Elect the primary and persist group + members atomically
    async fn persist_group(
        &self,
        key_kind: GroupKeyKind,
        key_value: &str,
        member_indices: &[usize],
        candidates: &[GroupCandidate],
        similarity_to_primary: impl Fn(&GroupCandidate, &GroupCandidate) -> f64,
    ) -> Result<(), CleanupError> {
        let mut election: Vec<&GroupCandidate> =
            member_indices.iter().map(|&i| &candidates[i]).collect();
        election.sort_by(|a, b| {
            scoring::compare_candidates(
                &primary_candidate(a),
                &primary_candidate(b),
                &self.format_priority,
            )
        });
        let primary = election[0];

        let members: Vec<(i64, bool, f64)> = election
            .iter()
            .map(|candidate| {
                let is_primary = candidate.file_id == primary.file_id;
                let similarity = if is_primary {
                    1.0
                } else {
                    similarity_to_primary(candidate, primary)
                };
                (candidate.file_id, is_primary, similarity)
            })
            .collect();

        duplicates::create_group(&self.db, key_kind, key_value, primary.file_id, &members).await?;

        // Non-primaries are slated for rejection
        for candidate in election.iter().skip(1) {
            sqlx::query(
                "UPDATE quality_analysis SET recommended_action = 'delete_duplicate' WHERE file_id = ?",
            )
            .bind(candidate.file_id)
            .execute(&self.db)
            .await
            .map_err(crate::error::StoreError::from)?;
        }

        Ok(())
    }

    async fn load_healthy_candidates(&self) -> Result<Vec<GroupCandidate>, CleanupError> {
        let rows = sqlx::query(
            r#"
            SELECT f.id, f.path, f.content_hash, f.size_bytes, f.quality_score,
                   fp.fingerprint, fp.duration_sec, fp.codec, fp.bitrate_kbps
            FROM files f
            LEFT JOIN fingerprints fp ON fp.id = f.fingerprint_id
            WHERE f.status = 'healthy'
            ORDER BY f.id
            "#,
        )
        .fetch_all(&self.db)
        .await
        .map_err(crate::error::StoreError::from)?;

        Ok(rows
            .iter()
            .map(|row| GroupCandidate {
                file_id: row.get("id"),
                path: row.get("path"),
                content_hash: row.get("content_hash"),
                size_bytes: row.get("size_bytes"),
                final_score: row.get::<Option<f64>, _>("quality_score").unwrap_or(0.0),
                fingerprint: row.get("fingerprint"),
                duration_sec: row.get("duration_sec"),
                codec: row.get("codec"),
                bitrate_kbps: row.get("bitrate_kbps"),
            })
            .collect())
    }
}

fn primary_candidate(candidate: &GroupCandidate) -> PrimaryCandidate {
    PrimaryCandidate {
        file_id: candidate.file_id,
        final_score: candidate.final_score,
        codec: candidate.codec.clone().unwrap_or_default(),
        bitrate_kbps: candidate.bitrate_kbps.unwrap_or(0) as u32,
        size_bytes: candidate.size_bytes,
        path: candidate.path.clone(),
    }
}
