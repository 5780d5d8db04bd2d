//! Distance-based matching and cross-account duplicate prevention.

use crate::types::{Embedding, IdentityRecord, MatchResult};

/// Default tolerance for verification.
pub const MATCH_TOLERANCE: f32 = 0.45;
/// Default tolerance for duplicate detection. Must stay below [`MATCH_TOLERANCE`].
pub const DUPLICATE_TOLERANCE: f32 = 0.42;

/// Strategy for comparing a query embedding against enrolled identities.
pub trait Matcher {
    /// Distance between two embeddings; smaller is more similar.
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32;

    /// Compare against a single claimed identity.
    fn compare_one(&self, query: &Embedding, record: &IdentityRecord, tolerance: f32) -> MatchResult {
        let distance = self.distance(query, &record.embedding);
        let matched = distance < tolerance;
        MatchResult {
            matched,
            distance,
            confidence: 1.0 - distance,
            identity: matched.then(|| record.identity.clone()),
        }
    }

    /// Best-of-many comparison. Returns `None` for an empty gallery.
    ///
    /// Every entry is visited, with no early exit, so traversal time does not
    /// depend on where the closest candidate sits. Ties keep the first entry.
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[IdentityRecord],
        tolerance: f32,
    ) -> Option<MatchResult> {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, record) in gallery.iter().enumerate() {
            let distance = self.distance(query, &record.embedding);
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        let idx = best_idx?;
        let matched = best_distance < tolerance;
        Some(MatchResult {
            matched,
            distance: best_distance,
            confidence: 1.0 - best_distance,
            identity: matched.then(|| gallery[idx].identity.clone()),
        })
    }
}

/// Euclidean distance over the embedding space.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Result of a duplicate check across accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCheck {
    pub duplicate: bool,
    /// Account that already owns this face, present only when `duplicate`.
    pub matched_identity: Option<String>,
    /// Distance to the closest other account; `None` when there was nobody to compare.
    pub distance: Option<f32>,
}

/// Blocks re-registration of a face that already belongs to another account.
#[derive(Debug, Clone, Copy)]
pub struct DuplicatePolicy<M = EuclideanMatcher> {
    matcher: M,
    tolerance: f32,
}

impl DuplicatePolicy<EuclideanMatcher> {
    pub fn new(tolerance: f32) -> Self {
        Self::with_matcher(EuclideanMatcher, tolerance)
    }
}

impl Default for DuplicatePolicy<EuclideanMatcher> {
    fn default() -> Self {
        Self::new(DUPLICATE_TOLERANCE)
    }
}

impl<M: Matcher> DuplicatePolicy<M> {
    pub fn with_matcher(matcher: M, tolerance: f32) -> Self {
        Self { matcher, tolerance }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Compare `query` against every enrolled identity except `excluding`.
    pub fn check(
        &self,
        query: &Embedding,
        enrolled: &[IdentityRecord],
        excluding: Option<&str>,
    ) -> DuplicateCheck {
        let candidates: Vec<IdentityRecord> = enrolled
            .iter()
            .filter(|r| excluding != Some(r.identity.as_str()))
            .cloned()
            .collect();

        match self.matcher.compare(query, &candidates, self.tolerance) {
            Some(result) => DuplicateCheck {
                duplicate: result.matched,
                matched_identity: result.identity,
                distance: Some(result.distance),
            },
            None => DuplicateCheck {
                duplicate: false,
                matched_identity: None,
                distance: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;

    /// 128-d embedding whose first component is `offset`; distance between two
    /// of these equals the difference of their offsets.
    fn emb(offset: f32) -> Embedding {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[0] = offset;
        Embedding::new(values)
    }

    fn record(identity: &str, offset: f32) -> IdentityRecord {
        IdentityRecord {
            identity: identity.into(),
            embedding: emb(offset),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_reflexive_match() {
        let e = emb(0.7);
        let r = IdentityRecord { identity: "id".into(), embedding: e.clone(), updated_at: String::new() };
        for tolerance in [1e-3, 0.42, 0.45, 10.0] {
            let result = EuclideanMatcher.compare_one(&e, &r, tolerance);
            assert!(result.matched, "tolerance {tolerance}");
            assert!(result.distance.abs() < 1e-6);
            assert!((result.confidence - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_single_candidate_strictly_below_tolerance() {
        let r = record("alice", 0.0);
        let result = EuclideanMatcher.compare_one(&emb(0.5), &r, 0.5);
        assert!(!result.matched, "distance equal to tolerance must not match");
        assert!(result.identity.is_none());
    }

    #[test]
    fn test_best_of_many_picks_minimum() {
        let gallery = vec![record("a", 1.0), record("b", 0.2), record("c", 0.6)];
        let result = EuclideanMatcher.compare(&emb(0.0), &gallery, 0.45).unwrap();
        assert!(result.matched);
        assert_eq!(result.identity.as_deref(), Some("b"));
        assert!((result.distance - 0.2).abs() < 1e-6);
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_best_of_many_hides_identity_above_tolerance() {
        let gallery = vec![record("a", 1.0), record("b", 0.6)];
        let result = EuclideanMatcher.compare(&emb(0.0), &gallery, 0.45).unwrap();
        assert!(!result.matched);
        assert!(result.identity.is_none());
        assert!((result.distance - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_best_of_many_visits_last_entry() {
        let gallery = vec![record("decoy1", 2.0), record("decoy2", 3.0), record("match", 0.01)];
        let result = EuclideanMatcher.compare(&emb(0.0), &gallery, 0.45).unwrap();
        assert_eq!(result.identity.as_deref(), Some("match"));
    }

    #[test]
    fn test_tie_keeps_first_in_order() {
        let gallery = vec![record("first", 0.3), record("second", -0.3)];
        let result = EuclideanMatcher.compare(&emb(0.0), &gallery, 0.45).unwrap();
        assert_eq!(result.identity.as_deref(), Some("first"));
    }

    #[test]
    fn test_empty_gallery() {
        assert!(EuclideanMatcher.compare(&emb(0.0), &[], 0.45).is_none());
    }

    #[test]
    fn test_duplicate_excludes_own_identity() {
        let gallery = vec![record("alice", 0.0)];
        let check = DuplicatePolicy::default().check(&emb(0.0), &gallery, Some("alice"));
        assert!(!check.duplicate);
        assert!(check.matched_identity.is_none());
        assert!(check.distance.is_none());
    }

    #[test]
    fn test_duplicate_flags_other_account() {
        let gallery = vec![record("alice", 0.0), record("bob", 2.0)];
        let check = DuplicatePolicy::default().check(&emb(0.30), &gallery, Some("mallory"));
        assert!(check.duplicate);
        assert_eq!(check.matched_identity.as_deref(), Some("alice"));
        assert!((check.distance.unwrap() - 0.30).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_tolerance_is_stricter_than_verification() {
        // 0.43 verifies at 0.45 but is not a duplicate at 0.42.
        let gallery = vec![record("alice", 0.0)];
        let query = emb(0.43);
        assert!(EuclideanMatcher.compare(&query, &gallery, MATCH_TOLERANCE).unwrap().matched);
        let check = DuplicatePolicy::default().check(&query, &gallery, None);
        assert!(!check.duplicate);
        assert!(check.matched_identity.is_none());
        assert!((check.distance.unwrap() - 0.43).abs() < 1e-6);
    }
}
