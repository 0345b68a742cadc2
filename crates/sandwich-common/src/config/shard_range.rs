//! Shard id range strings such as `"0-4,6-7"`

use super::ConfigError;

/// Expand a shard id range string into a sorted, de-duplicated id list
///
/// An empty string selects every shard. Ids outside `[0, shard_count)` are dropped.
pub fn parse_shard_ids(input: &str, shard_count: u32) -> Result<Vec<u32>, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok((0..shard_count).collect());
    }

    let mut ids = Vec::new();

    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let invalid = || ConfigError::InvalidValue("shard_ids", part.to_string());

        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let end: u32 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                ids.extend((start..=end).take_while(|id| *id < shard_count));
            }
            None => {
                let id: u32 = part.parse().map_err(|_| invalid())?;
                if id < shard_count {
                    ids.push(id);
                }
            }
        }
    }

    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Keep only the ids this node owns: `id % node_count == node_id`
pub fn filter_for_node(ids: Vec<u32>, node_count: u32, node_id: u32) -> Vec<u32> {
    if node_count <= 1 {
        return ids;
    }
    ids.into_iter()
        .filter(|id| id % node_count == node_id)
        .collect()
}
