//! Majority voting across repeated runs of one item.

use std::collections::HashMap;

use anyhow::{Result, bail};

/// Combine `runs_per_item` predictions into one.
///
/// When at least one run produced an extracted label, the vote is over labels
/// and ties break toward the earliest run holding a winning label; the
/// returned text is that same run's prediction. When no run produced a label,
/// the vote falls back to the raw prediction strings. The returned pair is
/// always one that appeared in the input.
pub fn select_majority(
    predictions: &[String],
    labels: &[Option<i64>],
) -> Result<(String, Option<i64>)> {
    if predictions.len() != labels.len() {
        bail!(
            "predictions ({}) and labels ({}) must have the same length",
            predictions.len(),
            labels.len()
        );
    }
    if predictions.is_empty() {
        bail!("cannot vote over zero runs");
    }
    if predictions.len() == 1 {
        return Ok((predictions[0].clone(), labels[0]));
    }

    if labels.iter().any(Option::is_some) {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for label in labels.iter().flatten() {
            *counts.entry(*label).or_default() += 1;
        }
        let max_count = counts.values().copied().max().unwrap_or(0);

        // Earliest run whose label reached the winning count.
        let (winner_idx, winning_label) = labels
            .iter()
            .enumerate()
            .find_map(|(i, label)| {
                label
                    .filter(|l| counts.get(l) == Some(&max_count))
                    .map(|l| (i, l))
            })
            .expect("a winning label must exist");

        return Ok((predictions[winner_idx].clone(), Some(winning_label)));
    }

    // No labels at all: vote on the raw strings, ties to first appearance.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for p in predictions {
        *counts.entry(p.as_str()).or_default() += 1;
    }
    let max_count = counts.values().copied().max().unwrap_or(0);
    let winner = predictions
        .iter()
        .find(|p| counts[p.as_str()] == max_count)
        .expect("a winning prediction must exist");

    Ok((winner.clone(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unique_label_winner() {
        let (text, label) = select_majority(
            &strings(&["one", "two", "two again"]),
            &[Some(1), Some(2), Some(2)],
        )
        .unwrap();
        assert_eq!(label, Some(2));
        assert_eq!(text, "two");
    }

    #[test]
    fn test_label_tie_breaks_to_earliest_run() {
        let (text, label) = select_majority(
            &strings(&["first", "second", "third", "fourth"]),
            &[Some(3), Some(1), Some(3), Some(1)],
        )
        .unwrap();
        assert_eq!(label, Some(3));
        assert_eq!(text, "first");
    }

    #[test]
    fn test_none_labels_are_ignored_in_label_vote() {
        // Failed runs don't outvote real labels.
        let (text, label) = select_majority(
            &strings(&["fail", "ans", "fail2", "ansB"]),
            &[None, Some(1), None, Some(1)],
        )
        .unwrap();
        assert_eq!(label, Some(1));
        assert_eq!(text, "ans");
    }

    #[test]
    fn test_all_none_falls_back_to_text_vote() {
        let (text, label) = select_majority(
            &strings(&["maybe", "likely", "likely"]),
            &[None, None, None],
        )
        .unwrap();
        assert_eq!(label, None);
        assert_eq!(text, "likely");
    }

    #[test]
    fn test_all_none_text_tie_breaks_first() {
        let (text, _) =
            select_majority(&strings(&["alpha", "beta"]), &[None, None]).unwrap();
        assert_eq!(text, "alpha");
    }

    #[test]
    fn test_single_run_short_circuits() {
        let (text, label) = select_majority(&strings(&["only"]), &[Some(7)]).unwrap();
        assert_eq!((text.as_str(), label), ("only", Some(7)));
    }

    #[test]
    fn test_result_always_from_input() {
        let predictions = strings(&["p1", "p2", "p3"]);
        let labels = [Some(1), Some(2), Some(1)];
        let (text, label) = select_majority(&predictions, &labels).unwrap();
        assert!(predictions.contains(&text));
        assert!(labels.contains(&label));
    }

    #[test]
    fn test_invalid_input() {
        assert!(select_majority(&[], &[]).is_err());
        assert!(select_majority(&strings(&["a"]), &[Some(1), Some(2)]).is_err());
    }
}
