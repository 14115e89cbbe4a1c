use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

use super::merge::merge_documents;
use super::{ConflictOutcome, ConflictRecord, ConflictStrategy};
use crate::model::{ConflictStatus, Document, ResourceKey};

/// A document from the current ingestion batch.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: ResourceKey,
    pub document: Document,
    /// Raw file the document was read from, relative to the fabric root.
    pub source: String,
    /// Modification time of the source file.
    pub timestamp: DateTime<Utc>,
    /// Position in the batch; breaks timestamp ties in favour of the later
    /// document.
    pub sequence: usize,
}

/// What already sits in `managed/` for a key.
#[derive(Debug, Clone)]
pub struct ManagedState {
    pub document: Document,
    pub path: String,
    pub modified: DateTime<Utc>,
    /// The version the registry last recorded for this key.
    pub known: Option<Document>,
    /// The file changed since the registry last recorded it (or the
    /// registry never saw it). Only then does it contend with incoming
    /// documents; otherwise incoming documents simply update it.
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write this document to the key's managed file.
    Accept { document: Document, source: String },
    /// The managed file stays as it is.
    KeepExisting,
    /// Nothing is written until a decision is made.
    Pending,
}

#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: ResourceKey,
    pub resolution: Resolution,
    pub conflict_status: ConflictStatus,
    pub record: Option<ConflictRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("aborted: excessive conflicts ({count} > {threshold})")]
pub struct ExcessiveConflicts {
    pub count: usize,
    pub threshold: usize,
}

/// One contender inside a key group.
struct Contender<'a> {
    document: &'a Document,
    source: &'a str,
    timestamp: DateTime<Utc>,
    /// Existing files rank below any incoming document at equal time.
    rank: (bool, usize),
    existing: bool,
}

pub struct ConflictResolver {
    strategy: ConflictStrategy,
    threshold: usize,
    default_namespace: String,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy, threshold: usize, default_namespace: &str) -> Self {
        Self {
            strategy,
            threshold,
            default_namespace: default_namespace.to_string(),
        }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Groups the batch by identity and settles every group. Fails without
    /// deciding anything when more keys conflict than the threshold allows,
    /// so the caller can abort the batch before touching the tree.
    pub fn resolve(
        &self,
        candidates: &[Candidate],
        managed: &HashMap<ResourceKey, ManagedState>,
    ) -> Result<Vec<ResolvedKey>, ExcessiveConflicts> {
        let mut groups: BTreeMap<&ResourceKey, Vec<&Candidate>> = BTreeMap::new();
        for candidate in candidates {
            groups.entry(&candidate.key).or_default().push(candidate);
        }

        let conflicted = groups
            .iter()
            .filter(|(key, group)| self.contenders(group, managed.get(**key)).is_conflict())
            .count();
        if conflicted > self.threshold {
            warn!(
                "{} conflicting identities exceed the threshold of {}",
                conflicted, self.threshold
            );
            return Err(ExcessiveConflicts {
                count: conflicted,
                threshold: self.threshold,
            });
        }

        Ok(groups
            .into_iter()
            .map(|(key, group)| self.resolve_group(key, &group, managed.get(key)))
            .collect())
    }

    fn contenders<'a>(
        &self,
        group: &[&'a Candidate],
        existing: Option<&'a ManagedState>,
    ) -> Contenders<'a> {
        let mut list: Vec<Contender<'a>> = group
            .iter()
            .map(|c| Contender {
                document: &c.document,
                source: &c.source,
                timestamp: c.timestamp,
                rank: (true, c.sequence),
                existing: false,
            })
            .collect();

        if let Some(state) = existing.filter(|s| s.dirty) {
            list.push(Contender {
                document: &state.document,
                source: &state.path,
                timestamp: state.modified,
                rank: (false, 0),
                existing: true,
            });
        }

        list.sort_by(|a, b| (a.timestamp, a.rank).cmp(&(b.timestamp, b.rank)));
        Contenders { list }
    }

    fn resolve_group(
        &self,
        key: &ResourceKey,
        group: &[&Candidate],
        existing: Option<&ManagedState>,
    ) -> ResolvedKey {
        let contenders = self.contenders(group, existing);
        let newest = contenders.newest();

        if !contenders.is_conflict() {
            // Duplicates with identical content are not a conflict
            let resolution = match newest {
                Some(c) if !c.existing => Resolution::Accept {
                    document: c.document.clone(),
                    source: c.source.to_string(),
                },
                _ => Resolution::KeepExisting,
            };
            return ResolvedKey {
                key: key.clone(),
                resolution,
                conflict_status: ConflictStatus::None,
                record: None,
            };
        }

        let (resolution, outcome) = match self.strategy {
            ConflictStrategy::MostRecentWins => match newest {
                Some(c) if !c.existing => (
                    Resolution::Accept {
                        document: c.document.clone(),
                        source: c.source.to_string(),
                    },
                    ConflictOutcome::Accepted,
                ),
                _ => (Resolution::KeepExisting, ConflictOutcome::KeptExisting),
            },
            ConflictStrategy::Manual => (Resolution::Pending, ConflictOutcome::PendingManual),
            ConflictStrategy::Merge => match self.merge(&contenders, existing) {
                Some(document) => (
                    Resolution::Accept {
                        document,
                        source: contenders.sources().join("+"),
                    },
                    ConflictOutcome::Merged,
                ),
                None => (Resolution::Pending, ConflictOutcome::MergeFailed),
            },
        };

        debug!("Conflict on {} settled as {}", key, outcome.as_str());

        ResolvedKey {
            key: key.clone(),
            resolution,
            conflict_status: if outcome.is_open() {
                ConflictStatus::Conflict
            } else {
                ConflictStatus::Resolved
            },
            record: Some(ConflictRecord {
                key: key.clone(),
                strategy: self.strategy,
                outcome,
                sources: contenders.sources(),
                detected_at: Utc::now(),
            }),
        }
    }

    /// Folds every contender into one document, oldest first. The base is
    /// the managed file when it is not itself contending, else the version
    /// the registry last recorded.
    fn merge(&self, contenders: &Contenders<'_>, existing: Option<&ManagedState>) -> Option<Document> {
        let base = existing.and_then(|s| if s.dirty { s.known.as_ref() } else { Some(&s.document) });

        let mut iter = contenders.list.iter();
        let mut merged = iter.next()?.document.clone();
        for next in iter {
            merged = merge_documents(base, &merged, next.document, &self.default_namespace)?;
        }
        Some(merged)
    }
}

struct Contenders<'a> {
    list: Vec<Contender<'a>>,
}

impl<'a> Contenders<'a> {
    fn is_conflict(&self) -> bool {
        let mut fingerprints: Vec<String> = self.list.iter().map(|c| c.document.fingerprint()).collect();
        fingerprints.sort();
        fingerprints.dedup();
        fingerprints.len() > 1
    }

    fn newest(&self) -> Option<&Contender<'a>> {
        self.list.last()
    }

    fn sources(&self) -> Vec<String> {
        self.list.iter().map(|c| c.source.to_string()).collect()
    }
}
