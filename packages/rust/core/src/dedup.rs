//! Exact-link and semantic deduplication.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use trendlyze_shared::{DuplicateStatus, Embedder, Record, sort_by_idx};

use crate::annotate::{CallLimits, bounded};

// ---------------------------------------------------------------------------
// Link deduplication
// ---------------------------------------------------------------------------

/// Keep the first record of every distinct `link`, preserving input order.
pub fn dedupe_by_link(records: Vec<Record>) -> Vec<Record> {
    let before = records.len();
    let mut seen = HashSet::new();
    let kept: Vec<Record> = records
        .into_iter()
        .filter(|r| seen.insert(r.link.clone()))
        .collect();
    info!(before, after = kept.len(), "link deduplication done");
    kept
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Cosine similarity of two vectors; `0.0` when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Full pairwise similarity matrix. Rows without a vector are all zero
/// except the diagonal.
pub fn similarity_matrix(vectors: &[Option<Vec<f32>>]) -> Vec<Vec<f32>> {
    let n = vectors.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            if let (Some(a), Some(b)) = (&vectors[i], &vectors[j]) {
                let s = cosine_similarity(a, b);
                matrix[i][j] = s;
                matrix[j][i] = s;
            }
        }
    }
    matrix
}

/// Label records R/D/N from a precomputed similarity matrix.
///
/// `matrix[i][j]` is the similarity of `records[i]` and `records[j]`; records
/// are visited in ascending `idx`. Each unvisited record claims every later
/// unvisited record strictly above `threshold` as its duplicate. Claims are
/// not transitive: a record similar only to a duplicate stays separate.
/// Output is sorted by `idx`.
pub fn classify_by_similarity(
    records: Vec<Record>,
    matrix: &[Vec<f32>],
    threshold: f32,
) -> Vec<Record> {
    let n = records.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| records[i].idx);

    let mut visited = vec![false; n];
    let mut status = vec![DuplicateStatus::Unique; n];
    let mut rep_of: Vec<Option<u64>> = vec![None; n];
    let mut dups_of: Vec<Vec<u64>> = vec![Vec::new(); n];

    for (pos, &i) in order.iter().enumerate() {
        if visited[i] {
            continue;
        }
        for &j in &order[pos + 1..] {
            if !visited[j] && matrix[i][j] > threshold {
                visited[j] = true;
                status[j] = DuplicateStatus::Duplicate;
                rep_of[j] = Some(records[i].idx);
                dups_of[i].push(records[j].idx);
            }
        }
        visited[i] = true;
        if !dups_of[i].is_empty() {
            status[i] = DuplicateStatus::Representative;
        }
    }

    let mut out: Vec<Record> = records
        .into_iter()
        .enumerate()
        .map(|(i, mut record)| {
            record.is_duplicate = Some(status[i]);
            record.rep_idx = rep_of[i];
            record.duplicates = match status[i] {
                DuplicateStatus::Representative => Some(std::mem::take(&mut dups_of[i])),
                _ => None,
            };
            record
        })
        .collect();
    sort_by_idx(&mut out);
    out
}

// ---------------------------------------------------------------------------
// SemanticDeduplicator
// ---------------------------------------------------------------------------

/// Near-duplicate labelling over content embeddings.
#[derive(Debug, Clone)]
pub struct SemanticDeduplicator {
    threshold: f32,
    batch_size: usize,
    limits: CallLimits,
}

impl Default for SemanticDeduplicator {
    fn default() -> Self {
        Self::new(0.85, 32)
    }
}

impl SemanticDeduplicator {
    pub fn new(threshold: f32, batch_size: usize) -> Self {
        Self {
            threshold,
            batch_size: batch_size.max(1),
            limits: CallLimits::default(),
        }
    }

    /// Bound every embedding call by `limits`.
    pub fn with_limits(mut self, limits: CallLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Embed every record's content and label R/D/N.
    ///
    /// Records without content or whose embedding failed are never compared;
    /// they come out `N`, and a failure is noted in `embeddingError`.
    #[instrument(skip_all, fields(count = records.len(), threshold = self.threshold))]
    pub async fn classify(&self, mut records: Vec<Record>, embedder: &dyn Embedder) -> Vec<Record> {
        sort_by_idx(&mut records);
        let vectors = self.embed_contents(&mut records, embedder).await;
        let matrix = similarity_matrix(&vectors);
        let out = classify_by_similarity(records, &matrix, self.threshold);

        let duplicates = out
            .iter()
            .filter(|r| r.is_duplicate == Some(DuplicateStatus::Duplicate))
            .count();
        info!(duplicates, "semantic deduplication done");
        out
    }

    /// One vector per record, in record order. Failures are recorded on the record.
    async fn embed_contents(
        &self,
        records: &mut [Record],
        embedder: &dyn Embedder,
    ) -> Vec<Option<Vec<f32>>> {
        let mut vectors = vec![None; records.len()];
        let with_body: Vec<usize> = (0..records.len())
            .filter(|&i| records[i].body().is_some())
            .collect();

        for chunk in with_body.chunks(self.batch_size) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|&i| records[i].body().unwrap_or_default().to_string())
                .collect();

            match bounded(&self.limits, "embedding", embedder.embed_batch(&texts)).await {
                Ok(batch) if batch.len() == chunk.len() => {
                    for (&i, vector) in chunk.iter().zip(batch) {
                        vectors[i] = Some(vector);
                    }
                }
                Ok(batch) => {
                    warn!(
                        expected = chunk.len(),
                        got = batch.len(),
                        "embedding batch size mismatch, embedding one by one"
                    );
                    self.embed_each(records, chunk, &texts, embedder, &mut vectors)
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "embedding batch failed, embedding one by one");
                    self.embed_each(records, chunk, &texts, embedder, &mut vectors)
                        .await;
                }
            }
        }
        vectors
    }

    async fn embed_each(
        &self,
        records: &mut [Record],
        chunk: &[usize],
        texts: &[String],
        embedder: &dyn Embedder,
        vectors: &mut [Option<Vec<f32>>],
    ) {
        for (&i, text) in chunk.iter().zip(texts) {
            match bounded(&self.limits, "embedding", embedder.embed(text)).await {
                Ok(vector) => vectors[i] = Some(vector),
                Err(e) => {
                    warn!(idx = records[i].idx, error = %e, "embedding failed");
                    records[i].embedding_error = Some(e.to_string());
                }
            }
        }
        debug!(count = chunk.len(), "per-item embedding fallback done");
    }
}

/// R/D/N counts of a record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateTally {
    pub representatives: usize,
    pub duplicates: usize,
    pub unique: usize,
    pub unlabeled: usize,
}

impl DuplicateTally {
    pub fn of(records: &[Record]) -> Self {
        records.iter().fold(Self::default(), |mut t, r| {
            match r.is_duplicate {
                Some(DuplicateStatus::Representative) => t.representatives += 1,
                Some(DuplicateStatus::Duplicate) => t.duplicates += 1,
                Some(DuplicateStatus::Unique) => t.unique += 1,
                None => t.unlabeled += 1,
            }
            t
        })
    }

    /// Records that are not a duplicate of another.
    pub fn distinct(&self) -> usize {
        self.representatives + self.unique + self.unlabeled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use trendlyze_shared::{MetaData, Result, TrendlyzeError};

    fn record(idx: u64, link: &str) -> Record {
        Record::stub(idx, MetaData::new("s"), format!("t{idx}"), link, "2025.05.28")
    }

    fn with_content(idx: u64, content: &str) -> Record {
        let mut r = record(idx, &format!("l{idx}"));
        r.content = Some(content.into());
        r
    }

    /// Embeds known texts to fixed vectors; fails on anything containing "fail".
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        batch_fails: bool,
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("fail") {
                return Err(TrendlyzeError::Capability("embed refused".into()));
            }
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| TrendlyzeError::Capability(format!("unknown text {text}")))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.batch_fails {
                return Err(TrendlyzeError::Capability("batch down".into()));
            }
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    fn matrix3(s01: f32, s02: f32, s12: f32) -> Vec<Vec<f32>> {
        vec![
            vec![1.0, s01, s02],
            vec![s01, 1.0, s12],
            vec![s02, s12, 1.0],
        ]
    }

    #[test]
    fn link_dedup_keeps_first() {
        let out = dedupe_by_link(vec![record(0, "a"), record(1, "b"), record(2, "a")]);
        let pairs: Vec<(u64, &str)> = out.iter().map(|r| (r.idx, r.link.as_str())).collect();
        assert_eq!(pairs, vec![(0, "a"), (1, "b")]);
    }

    #[test]
    fn cosine_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn greedy_scan_is_not_transitive() {
        let records = vec![record(0, "a"), record(1, "b"), record(2, "c")];
        let out = classify_by_similarity(records, &matrix3(0.9, 0.2, 0.91), 0.85);

        assert_eq!(out[0].is_duplicate, Some(DuplicateStatus::Representative));
        assert_eq!(out[0].duplicates, Some(vec![1]));
        assert_eq!(out[1].is_duplicate, Some(DuplicateStatus::Duplicate));
        assert_eq!(out[1].rep_idx, Some(0));
        assert_eq!(out[2].is_duplicate, Some(DuplicateStatus::Unique));
        assert_eq!(out[2].rep_idx, None);
        let order: Vec<u64> = out.iter().map(|r| r.idx).collect();
        assert_eq!(order, vec![0, 1, 2]);

        let tally = DuplicateTally::of(&out);
        assert_eq!((tally.representatives, tally.duplicates, tally.unique), (1, 1, 1));
        assert_eq!(tally.distinct(), 2);
    }

    #[test]
    fn below_threshold_everything_unique() {
        let records = vec![record(0, "a"), record(1, "b"), record(2, "c")];
        let out = classify_by_similarity(records, &matrix3(0.85, 0.5, 0.1), 0.85);
        assert!(
            out.iter()
                .all(|r| r.is_duplicate == Some(DuplicateStatus::Unique) && r.duplicates.is_none())
        );
    }

    #[test]
    fn scan_follows_idx_not_input_order() {
        // Input order 2, 0, 1: the lowest idx must still become the representative.
        let records = vec![record(2, "c"), record(0, "a"), record(1, "b")];
        let matrix = vec![
            vec![1.0, 0.95, 0.1],
            vec![0.95, 1.0, 0.1],
            vec![0.1, 0.1, 1.0],
        ];
        let out = classify_by_similarity(records, &matrix, 0.85);
        assert_eq!(out[0].idx, 0);
        assert_eq!(out[0].duplicates, Some(vec![2]));
        assert_eq!(out[2].rep_idx, Some(0));
        assert_eq!(out[1].is_duplicate, Some(DuplicateStatus::Unique));
    }

    #[tokio::test]
    async fn classify_embeds_content() {
        let table = HashMap::from([
            ("alpha".to_string(), vec![1.0, 0.0]),
            ("alpha again".to_string(), vec![0.99, 0.1]),
            ("beta".to_string(), vec![0.0, 1.0]),
        ]);
        let embedder = TableEmbedder {
            table,
            batch_fails: false,
        };
        let records = vec![
            with_content(0, "alpha"),
            with_content(1, "beta"),
            with_content(2, "alpha again"),
            with_content(3, ""),
        ];

        let out = SemanticDeduplicator::new(0.85, 2)
            .classify(records, &embedder)
            .await;

        assert_eq!(out[0].duplicates, Some(vec![2]));
        assert_eq!(out[1].is_duplicate, Some(DuplicateStatus::Unique));
        assert_eq!(out[2].rep_idx, Some(0));
        assert_eq!(out[3].is_duplicate, Some(DuplicateStatus::Unique));
        assert!(out[3].embedding_error.is_none());
    }

    #[tokio::test]
    async fn failed_embeddings_are_marked_and_kept() {
        let table = HashMap::from([
            ("alpha".to_string(), vec![1.0, 0.0]),
            ("alpha too".to_string(), vec![1.0, 0.0]),
        ]);
        let embedder = TableEmbedder {
            table,
            batch_fails: true,
        };
        let records = vec![
            with_content(0, "alpha"),
            with_content(1, "please fail"),
            with_content(2, "alpha too"),
        ];

        let out = SemanticDeduplicator::default()
            .classify(records, &embedder)
            .await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].duplicates, Some(vec![2]));
        assert_eq!(out[1].is_duplicate, Some(DuplicateStatus::Unique));
        assert!(out[1].embedding_error.as_deref().unwrap().contains("refused"));
    }

    /// Never answers.
    struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            std::future::pending().await
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_embedder_times_out_per_record() {
        let records = vec![with_content(0, "alpha"), with_content(1, "beta")];
        let dedup = SemanticDeduplicator::new(0.85, 8)
            .with_limits(CallLimits::new(Duration::from_millis(50), 1));

        let out = tokio::time::timeout(
            Duration::from_secs(5),
            dedup.classify(records, &StalledEmbedder),
        )
        .await
        .expect("classify returns despite a stalled embedder");

        assert_eq!(out.len(), 2);
        for r in &out {
            assert_eq!(r.is_duplicate, Some(DuplicateStatus::Unique));
            assert!(r.embedding_error.as_deref().unwrap().contains("timed out"));
        }
    }
}
