//! Exemplar Selection
//!
//! A folder is represented by its centroid plus up to k member vectors.
//! Four strategies:
//!
//! - **medoid** — members closest to the centroid (the folder's core)
//! - **boundary** — members farthest from it (the folder's edges)
//! - **diverse** — greedy max-min spread over the already chosen set
//! - **hybrid** — 40% medoid + 30% boundary + remainder diverse,
//!   deduplicated by concept id

use crate::config::ExemplarStrategy;
use crate::embed::dot_product;

/// A member eligible for exemplar selection
#[derive(Debug, Clone)]
pub struct MemberVector {
    /// The member concept
    pub concept_id: String,
    /// Its context vector
    pub vector: Vec<f32>,
}

/// Pick up to `k` exemplars from the folder members.
pub fn select_exemplars(
    members: &[MemberVector],
    centroid: &[f32],
    k: usize,
    strategy: ExemplarStrategy,
) -> Vec<MemberVector> {
    if k == 0 || members.is_empty() {
        return Vec::new();
    }
    match strategy {
        ExemplarStrategy::Medoid => nearest_to_centroid(members, centroid, k),
        ExemplarStrategy::Boundary => farthest_from_centroid(members, centroid, k),
        ExemplarStrategy::Diverse => max_min_spread(members, centroid, k, &[]),
        ExemplarStrategy::Hybrid => hybrid(members, centroid, k),
    }
}

fn by_centroid_similarity(members: &[MemberVector], centroid: &[f32]) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = members
        .iter()
        .enumerate()
        .map(|(i, m)| (i, dot_product(&m.vector, centroid)))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| members[a.0].concept_id.cmp(&members[b.0].concept_id))
    });
    scored
}

fn nearest_to_centroid(members: &[MemberVector], centroid: &[f32], k: usize) -> Vec<MemberVector> {
    by_centroid_similarity(members, centroid)
        .into_iter()
        .take(k)
        .map(|(i, _)| members[i].clone())
        .collect()
}

fn farthest_from_centroid(
    members: &[MemberVector],
    centroid: &[f32],
    k: usize,
) -> Vec<MemberVector> {
    let mut scored = by_centroid_similarity(members, centroid);
    scored.reverse();
    scored
        .into_iter()
        .take(k)
        .map(|(i, _)| members[i].clone())
        .collect()
}

/// Greedy max-min: seed with the medoid (or the given seeds), then repeat
/// picking the member whose nearest chosen exemplar is farthest away.
fn max_min_spread(
    members: &[MemberVector],
    centroid: &[f32],
    k: usize,
    seeds: &[MemberVector],
) -> Vec<MemberVector> {
    let mut chosen: Vec<MemberVector> = seeds.to_vec();
    if chosen.is_empty() {
        let mut medoid = nearest_to_centroid(members, centroid, 1);
        chosen.append(&mut medoid);
    }

    while chosen.len() < k {
        let next = members
            .iter()
            .filter(|m| !chosen.iter().any(|c| c.concept_id == m.concept_id))
            .map(|m| {
                let closest = chosen
                    .iter()
                    .map(|c| dot_product(&m.vector, &c.vector))
                    .fold(f32::NEG_INFINITY, f32::max);
                (m, closest)
            })
            .min_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.concept_id.cmp(&b.0.concept_id))
            });
        match next {
            Some((member, _)) => chosen.push(member.clone()),
            None => break,
        }
    }
    chosen.truncate(k);
    chosen
}

fn hybrid(members: &[MemberVector], centroid: &[f32], k: usize) -> Vec<MemberVector> {
    let medoid_count = ((k as f64) * 0.4).round().max(1.0) as usize;
    let boundary_count = ((k as f64) * 0.3).round() as usize;

    let mut chosen: Vec<MemberVector> = Vec::with_capacity(k);
    let mut push_unique = |pool: Vec<MemberVector>, chosen: &mut Vec<MemberVector>| {
        for member in pool {
            if !chosen.iter().any(|c| c.concept_id == member.concept_id) {
                chosen.push(member);
            }
        }
    };

    push_unique(nearest_to_centroid(members, centroid, medoid_count), &mut chosen);
    push_unique(
        farthest_from_centroid(members, centroid, boundary_count),
        &mut chosen,
    );
    if chosen.len() < k {
        chosen = max_min_spread(members, centroid, k, &chosen);
    }
    chosen.truncate(k);
    chosen
}

// ============================================================================
// TESTS
// ============================================================================
