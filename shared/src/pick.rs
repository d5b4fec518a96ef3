use rand::Rng;

/// Picks a uniformly random id from `ids`, never returning `exclude`.
/// Empty ids are skipped. Returns `None` when no other candidate exists.
pub fn pick_random_excluding<'a>(ids: &'a [String], exclude: &str) -> Option<&'a str> {
    let pool: Vec<&str> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| !id.is_empty() && *id != exclude)
        .collect();

    if pool.is_empty() {
        return None;
    }

    let idx = rand::thread_rng().gen_range(0..pool.len());
    Some(pool[idx])
}
