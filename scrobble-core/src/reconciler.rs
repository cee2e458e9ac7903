//! Recent-Window Reconciler (§4.2).
//!
//! A pure function from `(previous, current)` recent-items lists to a set of
//! genuinely new plays plus a diagnostic diff, for upstream APIs whose
//! "recent items" list is unordered/untimestamped and can reshuffle when a
//! track is replayed. No suspension happens in this module (§5): callers
//! that suspend (fetch, dispatch, sleep) live in `poller.rs`.

use crate::clock::Clock;
use crate::play::{PlayKey, PlayRecord};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::warn;

/// Which classification rule (§4.2) produced a reconciliation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationKind {
    /// Rule 1: `current` is consistent with `previous`'s relative order once
    /// any already-known items are accounted for; nothing new.
    SortConsistent,
    /// Rule 2: one or more previously-seen items moved toward the newest end.
    BumpedOnly,
    /// Rule 3: `current` is `previous` with new items prepended.
    AddedOnly,
    /// Rule 4: the two lists can't be explained by the rules above.
    Inconsistent,
}

/// How a single key's position changed between `previous` and `current`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Moved { from: usize, to: usize },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub key: PlayKey,
    pub change: ChangeKind,
}

/// A structural list-diff between `previous` and `current`, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub entries: Vec<DiffEntry>,
    pub summary: String,
}

/// The result of reconciling one cycle's recent-items list against the last.
pub struct ReconcileOutcome {
    pub kind: ReconciliationKind,
    /// Genuinely new plays, oldest-first, with synthesized `play_date` and
    /// `meta.new_from_source = true`.
    pub new_plays: Vec<PlayRecord>,
    /// Always present; informational only, never affects classification.
    pub diff: Diff,
    /// What the caller's window should become for the next cycle.
    pub next_window: Vec<PlayRecord>,
}

/// Reconciles a cycle's recent-items list against the previous cycle's.
///
/// `previous` and `current` are newest-first. `window_size` bounds
/// `next_window` to the most recent `window_size` entries (§4.1 `W`,
/// default 20).
pub fn reconcile(
    previous: &[PlayRecord],
    current: &[PlayRecord],
    clock: &dyn Clock,
    window_size: usize,
) -> ReconcileOutcome {
    let prev_keys: Vec<PlayKey> = previous.iter().map(PlayRecord::stable_key).collect();
    let cur_keys: Vec<PlayKey> = current.iter().map(PlayRecord::stable_key).collect();

    let diff = build_diff(&prev_keys, &cur_keys);
    let next_window = truncate_window(current, window_size);

    let new_key_count = cur_keys.iter().filter(|k| !prev_keys.contains(k)).count();

    if new_key_count == 0 {
        if is_subsequence(&cur_keys, &prev_keys) {
            return ReconcileOutcome {
                kind: ReconciliationKind::SortConsistent,
                new_plays: Vec::new(),
                diff,
                next_window,
            };
        }
        if let Some(bumped) = bumped_only(&prev_keys, current, &cur_keys) {
            // `bumped` is ordered newest-bump-first (ascending position in
            // `current`); synthesis wants oldest-first, so reverse it.
            let oldest_first: Vec<PlayRecord> = bumped.into_iter().rev().collect();
            let new_plays = synthesize_play_dates(oldest_first, clock);
            return ReconcileOutcome {
                kind: ReconciliationKind::BumpedOnly,
                new_plays,
                diff,
                next_window,
            };
        }
    } else if cur_keys[new_key_count..] == prev_keys[..] {
        // current = [new items] ++ previous, exactly.
        let prepended = &current[..new_key_count];
        // Prepended items are newest-first in `current`; emit oldest-first.
        let oldest_first: Vec<PlayRecord> = prepended.iter().rev().cloned().collect();
        let new_plays = synthesize_play_dates(oldest_first, clock);
        return ReconcileOutcome {
            kind: ReconciliationKind::AddedOnly,
            new_plays,
            diff,
            next_window,
        };
    }

    warn!(
        previous_len = previous.len(),
        current_len = current.len(),
        diff = %diff.summary,
        "recent-window reconciliation inconsistent; emitting no new plays this cycle"
    );
    ReconcileOutcome {
        kind: ReconciliationKind::Inconsistent,
        new_plays: Vec::new(),
        diff,
        next_window,
    }
}

/// Detects the "bumped-only" pattern (rule 2): same set of keys, reordered
/// solely by promoting one or more previously-seen items toward the front.
///
/// Returns the bumped records (newest-bump-first) if the pattern holds.
fn bumped_only(
    prev_keys: &[PlayKey],
    current: &[PlayRecord],
    cur_keys: &[PlayKey],
) -> Option<Vec<PlayRecord>> {
    if prev_keys.len() != cur_keys.len() {
        return None;
    }

    let bumped_positions: Vec<usize> = cur_keys
        .iter()
        .enumerate()
        .filter_map(|(new_idx, key)| {
            let old_idx = prev_keys.iter().position(|k| k == key)?;
            (new_idx < old_idx).then_some(new_idx)
        })
        .collect();

    if bumped_positions.is_empty() {
        return None;
    }

    let remaining_cur: Vec<&PlayKey> = cur_keys
        .iter()
        .enumerate()
        .filter(|(i, _)| !bumped_positions.contains(i))
        .map(|(_, k)| k)
        .collect();
    let bumped_keys: std::collections::HashSet<&PlayKey> = bumped_positions
        .iter()
        .map(|&i| &cur_keys[i])
        .collect();
    let remaining_prev: Vec<&PlayKey> = prev_keys
        .iter()
        .filter(|k| !bumped_keys.contains(k))
        .collect();

    if remaining_cur != remaining_prev {
        return None;
    }

    Some(
        bumped_positions
            .into_iter()
            .map(|i| current[i].clone())
            .collect(),
    )
}

/// Is `sub` a subsequence of `full`, preserving relative order?
fn is_subsequence(sub: &[PlayKey], full: &[PlayKey]) -> bool {
    let mut it = full.iter();
    sub.iter().all(|key| it.any(|k| k == key))
}

fn truncate_window(current: &[PlayRecord], window_size: usize) -> Vec<PlayRecord> {
    current.iter().take(window_size).cloned().collect()
}

fn minute_truncate(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp() - t.timestamp() % 60, 0).unwrap_or(t)
}

/// Assigns strictly increasing synthesized timestamps to newly emitted
/// plays, oldest-first, and marks them `new_from_source`.
fn synthesize_play_dates(oldest_first: Vec<PlayRecord>, clock: &dyn Clock) -> Vec<PlayRecord> {
    let base = minute_truncate(clock.now());
    oldest_first
        .into_iter()
        .enumerate()
        .map(|(k, mut play)| {
            let offset = ChronoDuration::seconds(i64::try_from(k).unwrap_or(i64::MAX) + 1);
            play.data.play_date = Some(base + offset);
            play.meta.new_from_source = true;
            play
        })
        .collect()
}

fn build_diff(prev_keys: &[PlayKey], cur_keys: &[PlayKey]) -> Diff {
    let mut entries = Vec::new();
    let mut added = 0usize;
    let mut removed = 0usize;
    let mut moved = 0usize;

    for (new_idx, key) in cur_keys.iter().enumerate() {
        match prev_keys.iter().position(|k| k == key) {
            None => {
                entries.push(DiffEntry {
                    key: key.clone(),
                    change: ChangeKind::Added,
                });
                added += 1;
            }
            Some(old_idx) if old_idx == new_idx => entries.push(DiffEntry {
                key: key.clone(),
                change: ChangeKind::Unchanged,
            }),
            Some(old_idx) => {
                entries.push(DiffEntry {
                    key: key.clone(),
                    change: ChangeKind::Moved {
                        from: old_idx,
                        to: new_idx,
                    },
                });
                moved += 1;
            }
        }
    }
    for key in prev_keys {
        if !cur_keys.contains(key) {
            entries.push(DiffEntry {
                key: key.clone(),
                change: ChangeKind::Removed,
            });
            removed += 1;
        }
    }

    let summary = format!("+{added} -{removed} ~{moved} (of {} previous)", prev_keys.len());
    Diff { entries, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn play(title: &str) -> PlayRecord {
        PlayRecord::new("lastfm", title)
    }

    fn clock_at(secs: i64) -> FakeClock {
        FakeClock::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    #[test]
    fn test_idempotent_identical_lists() {
        let prev = vec![play("A"), play("B")];
        let cur = prev.clone();
        let clock = clock_at(1_700_000_000);
        let outcome = reconcile(&prev, &cur, &clock, 20);
        assert_eq!(outcome.kind, ReconciliationKind::SortConsistent);
        assert!(outcome.new_plays.is_empty());
    }

    #[test]
    fn test_bumped_only_promotes_single_item() {
        // previous [B, A, C], current [A, B, C] (A promoted)
        let prev = vec![play("B"), play("A"), play("C")];
        let cur = vec![play("A"), play("B"), play("C")];
        let clock = clock_at(1_700_000_000);
        let outcome = reconcile(&prev, &cur, &clock, 20);
        assert_eq!(outcome.kind, ReconciliationKind::BumpedOnly);
        assert_eq!(outcome.new_plays.len(), 1);
        assert_eq!(outcome.new_plays[0].data.track, "A");
        assert!(outcome.new_plays[0].meta.new_from_source);
        let expected_base = minute_truncate(DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default());
        assert_eq!(
            outcome.new_plays[0].data.play_date,
            Some(expected_base + ChronoDuration::seconds(1))
        );
    }

    #[test]
    fn test_added_only_emits_oldest_first() {
        // previous [C, D], current [A, B, C, D] => emit [B, A] oldest-first
        let prev = vec![play("C"), play("D")];
        let cur = vec![play("A"), play("B"), play("C"), play("D")];
        let clock = clock_at(1_700_000_000);
        let outcome = reconcile(&prev, &cur, &clock, 20);
        assert_eq!(outcome.kind, ReconciliationKind::AddedOnly);
        let titles: Vec<_> = outcome.new_plays.iter().map(|p| p.data.track.clone()).collect();
        assert_eq!(titles, vec!["B", "A"]);
        let base = minute_truncate(DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default());
        assert_eq!(outcome.new_plays[0].data.play_date, Some(base + ChronoDuration::seconds(1)));
        assert_eq!(outcome.new_plays[1].data.play_date, Some(base + ChronoDuration::seconds(2)));
    }

    #[test]
    fn test_inconsistent_reorder_emits_nothing_but_replaces_window() {
        // previous [A, B, C], current [C, A, B]
        let prev = vec![play("A"), play("B"), play("C")];
        let cur = vec![play("C"), play("A"), play("B")];
        let clock = clock_at(1_700_000_000);
        let outcome = reconcile(&prev, &cur, &clock, 20);
        assert_eq!(outcome.kind, ReconciliationKind::Inconsistent);
        assert!(outcome.new_plays.is_empty());
        let next_titles: Vec<_> = outcome.next_window.iter().map(|p| p.data.track.clone()).collect();
        assert_eq!(next_titles, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_round_trip_of_bump_is_idempotent() {
        let prev = vec![play("B"), play("A"), play("C")];
        let cur = vec![play("A"), play("B"), play("C")];
        let clock = clock_at(1_700_000_000);
        let first = reconcile(&prev, &cur, &clock, 20);
        assert_eq!(first.kind, ReconciliationKind::BumpedOnly);

        // Feed previous := current; current := previous (no further change).
        let second = reconcile(&cur, &cur, &clock, 20);
        assert_eq!(second.kind, ReconciliationKind::SortConsistent);
        assert!(second.new_plays.is_empty());
    }

    #[test]
    fn test_window_truncated_to_size() {
        let prev: Vec<PlayRecord> = Vec::new();
        let cur: Vec<PlayRecord> = (0..5).map(|i| play(&format!("T{i}"))).collect();
        let clock = clock_at(0);
        let outcome = reconcile(&prev, &cur, &clock, 3);
        assert_eq!(outcome.next_window.len(), 3);
    }

    #[test]
    fn test_diff_reports_added_and_removed() {
        let prev = vec![play("A"), play("B")];
        let cur = vec![play("B"), play("C")];
        let clock = clock_at(0);
        let outcome = reconcile(&prev, &cur, &clock, 20);
        assert!(outcome.diff.summary.contains("+1"));
        assert!(outcome.diff.summary.contains("-1"));
    }
}
