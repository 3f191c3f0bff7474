//! Per-target link resolution.

use crate::cache::snapshot::{ConfigSnapshot, TargetChannel};

/// The link `target` should receive for `code`.
///
/// Among the target owner's overrides for the target channel, picks those
/// whose fragment occurs (ignoring case) in the code or the default link.
/// The longest fragment wins; on a tie the first loaded wins. Without a
/// match the default link is returned unchanged.
pub fn resolve_link<'a>(
    snapshot: &'a ConfigSnapshot,
    target: &TargetChannel,
    code: &str,
    default_link: &'a str,
) -> &'a str {
    let code_lower = code.to_lowercase();
    let link_lower = default_link.to_lowercase();

    let mut best: Option<(usize, &'a str)> = None;
    for link in snapshot.overrides_for(target.owner_id, target.channel_id) {
        let fragment = link.fragment.trim().to_lowercase();
        if fragment.is_empty() {
            continue;
        }
        if !code_lower.contains(&fragment) && !link_lower.contains(&fragment) {
            continue;
        }
        let len = fragment.chars().count();
        if best.is_none_or(|(best_len, _)| len > best_len) {
            best = Some((len, link.url.as_str()));
        }
    }

    best.map_or(default_link, |(_, url)| url)
}
