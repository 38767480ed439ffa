//! Merge and unmerge rules for endpoints sharing a group id.
//!
//! These are pure functions over [`SoundDevice`] values; the collection
//! applies their results to its map.

use std::collections::{BTreeMap, BTreeSet};

use super::device::{FlowType, SoundDevice, NAME_SEPARATOR};

/// Sentinel container id reported for endpoints without a plug-and-play id.
pub const NO_PLUG_AND_PLAY_GUID: &str = "00000000-0000-0000-FFFF-FFFFFFFFFFFF";

/// Split a merged name into its set of endpoint names.
pub fn split_names(name: &str) -> BTreeSet<String> {
    name.split(NAME_SEPARATOR).map(str::to_string).collect()
}

/// Join a name set back into a display name.
pub fn join_names(names: &BTreeSet<String>) -> String {
    let mut joined = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            joined.push(NAME_SEPARATOR);
        }
        joined.push_str(name);
    }
    joined
}

/// Merge an incoming single-endpoint device into the stored entry, if any.
///
/// The incoming endpoint's direction wins for its own volume; the stored
/// device's volume is kept for the other direction.
pub fn merge_device(existing: Option<&SoundDevice>, incoming: &SoundDevice) -> SoundDevice {
    let Some(existing) = existing else {
        return incoming.clone();
    };
    // Only a single-direction endpoint can contribute to an entry.
    if !matches!(incoming.flow, FlowType::Render | FlowType::Capture) {
        return existing.clone();
    }

    let mut flow = incoming.flow;
    let mut render_volume = incoming.render_volume;
    let mut capture_volume = incoming.capture_volume;

    if existing.flow != incoming.flow {
        match incoming.flow {
            FlowType::Capture => render_volume = existing.render_volume,
            _ => capture_volume = existing.capture_volume,
        }
        flow = FlowType::RenderAndCapture;
    }

    let mut names = split_names(&existing.name);
    names.insert(incoming.name.clone());

    SoundDevice::new(
        incoming.group_id.clone(),
        join_names(&names),
        flow,
        render_volume,
        capture_volume,
    )
}

/// Result of removing one endpoint from the stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmerge {
    /// No stored entry, or the flows do not overlap; nothing changes
    Stale,

    /// The removed endpoint was the entry's only direction
    Delete,

    /// The entry keeps the remaining direction
    Remaining(SoundDevice),
}

/// Compute what remains of the stored entry after `removed` goes away.
pub fn unmerge_device(existing: Option<&SoundDevice>, removed: &SoundDevice) -> Unmerge {
    let Some(existing) = existing else {
        return Unmerge::Stale;
    };

    if existing.flow == removed.flow {
        return Unmerge::Delete;
    }

    if existing.flow != FlowType::RenderAndCapture {
        return Unmerge::Stale;
    }

    let mut render_volume = existing.render_volume;
    let mut capture_volume = existing.capture_volume;
    let flow = match removed.flow {
        FlowType::Capture => {
            capture_volume = 0;
            FlowType::Render
        }
        FlowType::Render => {
            render_volume = 0;
            FlowType::Capture
        }
        FlowType::None | FlowType::RenderAndCapture => return Unmerge::Stale,
    };

    let mut names = split_names(&existing.name);
    names.remove(&removed.name);
    let name = if names.is_empty() {
        existing.name.clone()
    } else {
        join_names(&names)
    };

    Unmerge::Remaining(SoundDevice::new(
        existing.group_id.clone(),
        name,
        flow,
        render_volume,
        capture_volume,
    ))
}

/// Group ids whose render or capture volume differs between two snapshots.
///
/// Groups absent from either snapshot are ignored.
pub fn changed_volumes(
    before: &BTreeMap<String, SoundDevice>,
    after: &BTreeMap<String, SoundDevice>,
) -> (Vec<String>, Vec<String>) {
    let mut render = Vec::new();
    let mut capture = Vec::new();
    for (group_id, old) in before {
        if let Some(new) = after.get(group_id) {
            if old.render_volume != new.render_volume {
                render.push(group_id.clone());
            }
            if old.capture_volume != new.capture_volume {
                capture.push(group_id.clone());
            }
        }
    }
    (render, capture)
}

/// Case-insensitive substring test used by the name filter.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_uppercase().contains(&needle.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speakers() -> SoundDevice {
        SoundDevice::from_endpoint("G1", "Speakers", FlowType::Render, 800)
    }

    fn microphone() -> SoundDevice {
        SoundDevice::from_endpoint("G1", "Microphone", FlowType::Capture, 500)
    }

    #[test]
    fn test_merge_into_empty_slot_is_identity() {
        assert_eq!(merge_device(None, &speakers()), speakers());
    }

    #[test]
    fn test_merge_is_commutative() {
        let render_first = merge_device(Some(&speakers()), &microphone());
        let capture_first = merge_device(Some(&microphone()), &speakers());

        assert_eq!(render_first, capture_first);
        assert_eq!(render_first.flow, FlowType::RenderAndCapture);
        assert_eq!(render_first.name, "Microphone/Speakers");
        assert_eq!(render_first.render_volume, 800);
        assert_eq!(render_first.capture_volume, 500);
    }

    #[test]
    fn test_merge_same_direction_updates_volume_and_dedups_name() {
        let louder = SoundDevice::from_endpoint("G1", "Speakers", FlowType::Render, 900);
        let merged = merge_device(Some(&speakers()), &louder);
        assert_eq!(merged.flow, FlowType::Render);
        assert_eq!(merged.name, "Speakers");
        assert_eq!(merged.render_volume, 900);
        assert_eq!(merged.capture_volume, 0);
    }

    #[test]
    fn test_merge_ignores_endpoint_without_single_direction() {
        let odd = SoundDevice::from_endpoint("G1", "Odd", FlowType::None, 500);
        assert_eq!(merge_device(Some(&speakers()), &odd), speakers());

        let both = SoundDevice::new("G1", "Both", FlowType::RenderAndCapture, 100, 100);
        assert_eq!(merge_device(Some(&microphone()), &both), microphone());
    }

    #[test]
    fn test_unmerge_capture_keeps_render() {
        let merged = merge_device(Some(&speakers()), &microphone());
        let Unmerge::Remaining(rest) = unmerge_device(Some(&merged), &microphone()) else {
            panic!("expected a remaining device");
        };
        assert_eq!(rest.flow, FlowType::Render);
        assert_eq!(rest.name, "Speakers");
        assert_eq!(rest.render_volume, 800);
        assert_eq!(rest.capture_volume, 0);
    }

    #[test]
    fn test_unmerge_render_keeps_capture() {
        let merged = merge_device(Some(&microphone()), &speakers());
        let Unmerge::Remaining(rest) = unmerge_device(Some(&merged), &speakers()) else {
            panic!("expected a remaining device");
        };
        assert_eq!(rest.flow, FlowType::Capture);
        assert_eq!(rest.name, "Microphone");
        assert_eq!(rest.render_volume, 0);
        assert_eq!(rest.capture_volume, 500);
    }

    #[test]
    fn test_unmerge_last_direction_deletes() {
        assert_eq!(unmerge_device(Some(&speakers()), &speakers()), Unmerge::Delete);
    }

    #[test]
    fn test_unmerge_mismatched_or_missing_is_stale() {
        assert_eq!(unmerge_device(Some(&speakers()), &microphone()), Unmerge::Stale);
        assert_eq!(unmerge_device(None, &speakers()), Unmerge::Stale);
    }

    #[test]
    fn test_unmerge_identical_names_keeps_name() {
        let render = SoundDevice::from_endpoint("G2", "Headset", FlowType::Render, 300);
        let capture = SoundDevice::from_endpoint("G2", "Headset", FlowType::Capture, 400);
        let merged = merge_device(Some(&render), &capture);
        assert_eq!(merged.name, "Headset");

        let Unmerge::Remaining(rest) = unmerge_device(Some(&merged), &capture) else {
            panic!("expected a remaining device");
        };
        assert_eq!(rest.name, "Headset");
    }

    #[test]
    fn test_changed_volumes_reports_per_direction() {
        let merged = merge_device(Some(&speakers()), &microphone());
        let before = BTreeMap::from([("G1".to_string(), merged.clone())]);
        let mut after_device = merged;
        after_device.render_volume = 650;
        let after = BTreeMap::from([("G1".to_string(), after_device)]);

        let (render, capture) = changed_volumes(&before, &after);
        assert_eq!(render, vec!["G1".to_string()]);
        assert!(capture.is_empty());
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("Jabra SPEAK 510", "speak"));
        assert!(contains_ignore_case("anything", ""));
        assert!(!contains_ignore_case("Speakers", "micro"));
    }
}
