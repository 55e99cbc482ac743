//! "Did you mean" matching for tool names, actions and argument keys.

/// Lowercases and drops separators so `list_containers`, `ListContainers` and
/// `list-containers` compare equal.
fn normalize(value: &str) -> Vec<char> {
    value
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn edit_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn contains(haystack: &[char], needle: &[char]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn score(input: &[char], candidate: &[char]) -> Option<usize> {
    if input.is_empty() || candidate.is_empty() {
        return None;
    }
    if input == candidate {
        return Some(0);
    }
    if contains(candidate, input) || contains(input, candidate) {
        return Some(1);
    }
    Some(edit_distance(input, candidate))
}

fn tolerance(len: usize) -> usize {
    match len {
        0 => 0,
        1..=4 => 1,
        5..=8 => 2,
        _ => (len * 35 / 100).max(3),
    }
}

/// Up to `limit` candidates close to `input`, best first.
pub fn suggest<'a, I>(input: &str, candidates: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = normalize(input);
    let allowed = tolerance(needle.len());
    if allowed == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            score(&needle, &normalize(candidate))
                .filter(|distance| *distance <= allowed)
                .map(|distance| (distance, candidate))
        })
        .collect();
    scored.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.len().cmp(&b.1.len()))
            .then_with(|| a.1.cmp(b.1))
    });
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit.max(1))
        .map(|(_, candidate)| candidate.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_near_tool_names() {
        let tools = ["proxmox_list_containers", "proxmox_container_status"];
        assert_eq!(
            suggest("proxmox_list_container", tools, 3),
            vec!["proxmox_list_containers".to_string()]
        );
    }

    #[test]
    fn typo_in_action() {
        let actions = ["status", "reconnect"];
        assert_eq!(suggest("reconect", actions, 3), vec!["reconnect".to_string()]);
        assert_eq!(suggest("stauts", actions, 3), vec!["status".to_string()]);
    }

    #[test]
    fn nothing_for_unrelated_or_empty_input() {
        let actions = ["exec", "download", "upload"];
        assert!(suggest("zzzzzzzz", actions, 3).is_empty());
        assert!(suggest("  ", actions, 3).is_empty());
    }
}
