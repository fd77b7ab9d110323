//! Change Detector - snapshot diffing for tracked items
//!
//! Pure functions that compare a stored marker against a freshly fetched
//! snapshot and decide what counts as "new". The scheduler applies the
//! returned marker and hands notifications to the dispatcher.
//!
//! Release and issue watches compare a single latest id: the endpoints only
//! ever expose one current value, so equality is a correct is-new test.
//! Releases published between two polls are missed; only the most recent is
//! ever seen (known limitation, kept deliberately since changing it would
//! change notification volume and ordering).

use std::collections::BTreeSet;

use crate::github::StarredRepo;
use crate::store::Marker;

/// Outcome of diffing a latest-id watch (release or issue)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestDiff {
    /// Nothing fetched, or the fetched id equals the marker
    Unchanged,
    /// First-ever observation: seed the marker, notify nothing
    Baseline(Marker),
    /// The latest id moved: update the marker and notify once
    Changed(Marker),
}

/// Diff the fetched latest id against the stored marker
pub fn diff_latest(marker: Option<&Marker>, fetched_id: Option<&str>) -> LatestDiff {
    let Some(fetched_id) = fetched_id else {
        return LatestDiff::Unchanged;
    };

    let last_seen = match marker {
        Some(Marker::Latest(id)) => Some(id.as_str()),
        // No baseline yet; a star-set marker on a latest watch is treated
        // the same and re-seeded
        _ => None,
    };

    match last_seen {
        None => LatestDiff::Baseline(Marker::Latest(fetched_id.to_string())),
        Some(id) if id == fetched_id => LatestDiff::Unchanged,
        Some(_) => LatestDiff::Changed(Marker::Latest(fetched_id.to_string())),
    }
}

/// Outcome of diffing a star watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarDiff {
    /// Replacement marker: always the full fetched id set, so unstars
    /// self-heal instead of accumulating stale ids
    pub new_marker: Marker,
    /// Repositories to notify about, in chronological starring order
    pub newly_starred: Vec<StarredRepo>,
    /// True when this poll only established the baseline
    pub baseline: bool,
}

/// Diff a freshly fetched starred page (newest first) against the stored set.
///
/// The fetched list is walked newest to oldest, collecting entries until the
/// first id already present in the stored set; everything older is assumed
/// known because the list is chronologically ordered. This bounds the scan to
/// the number of new stars and tolerates unstars below the stop point. An
/// empty page resets the stored set to empty.
pub fn diff_stars(marker: Option<&Marker>, fetched: &[StarredRepo]) -> StarDiff {
    let fetched_ids: BTreeSet<String> = fetched.iter().map(|repo| repo.id.clone()).collect();

    let last_known = match marker {
        Some(Marker::StarSet(set)) => Some(set),
        _ => None,
    };

    let Some(last_known) = last_known else {
        return StarDiff {
            new_marker: Marker::StarSet(fetched_ids),
            newly_starred: Vec::new(),
            baseline: true,
        };
    };

    let mut newly_starred = Vec::new();
    for repo in fetched {
        if last_known.contains(&repo.id) {
            break;
        }
        newly_starred.push(repo.clone());
    }
    newly_starred.reverse();

    StarDiff {
        new_marker: Marker::StarSet(fetched_ids),
        newly_starred,
        baseline: false,
    }
}
