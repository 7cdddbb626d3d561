use rand::rng;
use rand::seq::SliceRandom;

use review_core::model::MaterialId;

/// Reorders a multiset of items to maximize adjacent-origin diversity.
///
/// Partitions by origin, shuffles each origin's sub-list independently, then
/// repeatedly picks from the group with the most remaining items among those
/// whose origin differs from the previous pick (ties broken by remaining
/// count, then arbitrarily). When every remaining item shares the previous
/// origin the pick is forced from it. The output is always a full permutation
/// of the input; a single-origin input degrades to no-diversity order.
#[must_use]
pub fn interleave_by_origin<T, F>(items: Vec<T>, origin_of: F) -> Vec<T>
where
    F: Fn(&T) -> &MaterialId,
{
    let mut groups: Vec<(MaterialId, Vec<T>)> = Vec::new();
    for item in items {
        let origin = origin_of(&item).clone();
        match groups.iter_mut().find(|(id, _)| *id == origin) {
            Some((_, group)) => group.push(item),
            None => groups.push((origin, vec![item])),
        }
    }

    let mut rng = rng();
    for (_, group) in &mut groups {
        group.shuffle(&mut rng);
    }

    let total: usize = groups.iter().map(|(_, group)| group.len()).sum();
    let mut out = Vec::with_capacity(total);
    let mut previous: Option<MaterialId> = None;

    while out.len() < total {
        let pick = groups
            .iter()
            .enumerate()
            .filter(|(_, (id, group))| !group.is_empty() && previous.as_ref() != Some(id))
            .max_by_key(|(_, (_, group))| group.len())
            .map(|(index, _)| index)
            // All remaining items share the previous origin: forced pick.
            .or_else(|| groups.iter().position(|(_, group)| !group.is_empty()));

        let Some(index) = pick else { break };
        let (id, group) = &mut groups[index];
        previous = Some(id.clone());
        if let Some(item) = group.pop() {
            out.push(item);
        }
    }

    out
}
