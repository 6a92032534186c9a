pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, na, nb) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, aa, bb), (x, y)| {
            (d + (x * y), aa + (x * x), bb + (y * y))
        });

    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// First-max scan over `candidates`. Returns the index and score of the most
/// similar vector; on ties the lowest index wins. `None` when there are no
/// candidates.
pub fn nearest<V: AsRef<[f32]>>(query: &[f32], candidates: &[V]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;

    for (idx, candidate) in candidates.iter().enumerate() {
        let score = cosine_similarity(query, candidate.as_ref());
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((idx, score)),
        }
    }

    best
}
