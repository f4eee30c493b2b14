use std::collections::BTreeMap;

use rand::seq::SliceRandom;

use crate::models::{
    AggregatedRating, AnonymityThreshold, Disclosure, HiddenReason, OverallScore, RatingAggregate,
    RatingResponse, ReviewerCategory, TextAggregate, TextResponse,
};

/// Rounds half-up to two decimal places.
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    // absorb representation error such as 4.645 -> 464.49999...
    (scaled + scaled.signum() * 1e-9).round() / 100.0
}

fn visibility(count: usize, threshold: AnonymityThreshold) -> Option<HiddenReason> {
    if count == 0 {
        Some(HiddenReason::NoResponses)
    } else if count < threshold.get() {
        Some(HiddenReason::BelowThreshold {
            count,
            required: threshold.get(),
        })
    } else {
        None
    }
}

pub fn aggregate_ratings(
    responses: &[RatingResponse],
    threshold: AnonymityThreshold,
) -> RatingAggregate {
    let values: Vec<i32> = responses.iter().filter_map(|r| r.rating_value).collect();

    if let Some(reason) = visibility(values.len(), threshold) {
        return Disclosure::Hidden(reason);
    }

    let mut distribution = BTreeMap::new();
    for value in &values {
        *distribution.entry(*value).or_insert(0usize) += 1;
    }

    let sum: f64 = values.iter().map(|v| *v as f64).sum();
    Disclosure::Visible(AggregatedRating {
        average: round2(sum / values.len() as f64),
        count: values.len(),
        distribution,
    })
}

/// Visible text comes back in a fresh random order on every call so that
/// position cannot be correlated with submission order.
pub fn aggregate_text_responses(
    responses: &[TextResponse],
    threshold: AnonymityThreshold,
) -> TextAggregate {
    let mut texts: Vec<String> = responses
        .iter()
        .filter_map(|r| r.text_value.as_deref())
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
        .collect();

    if let Some(reason) = visibility(texts.len(), threshold) {
        return Disclosure::Hidden(reason);
    }

    texts.shuffle(&mut rand::thread_rng());
    Disclosure::Visible(texts)
}

pub fn group_responses_by_reviewer_type(
    responses: &[RatingResponse],
    threshold: AnonymityThreshold,
) -> BTreeMap<ReviewerCategory, RatingAggregate> {
    ReviewerCategory::ALL
        .into_iter()
        .map(|category| {
            let bucket: Vec<RatingResponse> = responses
                .iter()
                .filter(|r| r.reviewer_category == category)
                .copied()
                .collect();
            let aggregate = aggregate_ratings(&bucket, category.effective_threshold(threshold));
            (category, aggregate)
        })
        .collect()
}

pub fn group_text_responses_by_reviewer_type(
    responses: &[TextResponse],
    threshold: AnonymityThreshold,
) -> BTreeMap<ReviewerCategory, TextAggregate> {
    ReviewerCategory::ALL
        .into_iter()
        .map(|category| {
            let bucket: Vec<TextResponse> = responses
                .iter()
                .filter(|r| r.reviewer_category == category)
                .cloned()
                .collect();
            let aggregate =
                aggregate_text_responses(&bucket, category.effective_threshold(threshold));
            (category, aggregate)
        })
        .collect()
}

/// Mean of the visible category averages. Each category counts once no
/// matter how many respondents fed it.
pub fn calculate_overall_score(
    grouped: &BTreeMap<ReviewerCategory, RatingAggregate>,
) -> Option<OverallScore> {
    let averages: Vec<f64> = grouped
        .values()
        .filter_map(Disclosure::visible)
        .map(|rating| rating.average)
        .collect();

    if averages.is_empty() {
        return None;
    }

    let total: f64 = averages.iter().sum();
    Some(OverallScore {
        score: round2(total / averages.len() as f64),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;

    fn threshold(value: i64) -> AnonymityThreshold {
        AnonymityThreshold::new(value).unwrap()
    }

    fn ratings(category: ReviewerCategory, values: &[Option<i32>]) -> Vec<RatingResponse> {
        values
            .iter()
            .map(|value| RatingResponse {
                rating_value: *value,
                reviewer_category: category,
            })
            .collect()
    }

    fn texts(category: ReviewerCategory, values: &[&str]) -> Vec<TextResponse> {
        values
            .iter()
            .map(|value| TextResponse {
                text_value: Some(value.to_string()),
                reviewer_category: category,
            })
            .collect()
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(round2(4.0), 4.0);
        assert_eq!(round2(4.645), 4.65);
        assert_eq!(round2(3.333333), 3.33);
        assert_eq!(round2(2.675), 2.68);
    }

    #[test]
    fn threshold_boundary() {
        let below = ratings(ReviewerCategory::Peer, &[Some(4), Some(5)]);
        assert_eq!(
            aggregate_ratings(&below, threshold(3)),
            Disclosure::Hidden(HiddenReason::BelowThreshold {
                count: 2,
                required: 3
            })
        );

        let met = ratings(ReviewerCategory::Peer, &[Some(4), Some(5), Some(3)]);
        let rating = aggregate_ratings(&met, threshold(3));
        let rating = rating.visible().expect("visible at threshold");
        assert_eq!(rating.average, 4.0);
        assert_eq!(rating.count, 3);
        assert_eq!(
            rating.distribution,
            BTreeMap::from([(3, 1), (4, 1), (5, 1)])
        );
    }

    #[test]
    fn text_threshold_boundary() {
        let below = texts(ReviewerCategory::Peer, &["Direct feedback", "Good mentor"]);
        assert_eq!(
            aggregate_text_responses(&below, threshold(3)),
            Disclosure::Hidden(HiddenReason::BelowThreshold {
                count: 2,
                required: 3
            })
        );

        let met = texts(
            ReviewerCategory::Peer,
            &["Direct feedback", "Good mentor", "Keeps docs current"],
        );
        let shown = aggregate_text_responses(&met, threshold(3));
        let shown: BTreeSet<&str> = shown
            .visible()
            .expect("visible at threshold")
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(
            shown,
            BTreeSet::from(["Direct feedback", "Good mentor", "Keeps docs current"])
        );
    }

    #[test]
    fn skipped_ratings_are_excluded() {
        let responses = ratings(ReviewerCategory::Peer, &[Some(4), None, Some(5)]);
        let rating = aggregate_ratings(&responses, threshold(2));
        let rating = rating.visible().expect("two completed ratings");
        assert_eq!(rating.count, 2);
        assert_eq!(rating.average, 4.5);
    }

    #[test]
    fn distribution_only_has_observed_values() {
        let responses = ratings(ReviewerCategory::Peer, &[Some(2), Some(2), Some(5)]);
        let rating = aggregate_ratings(&responses, threshold(1));
        assert_eq!(
            rating.visible().unwrap().distribution,
            BTreeMap::from([(2, 2), (5, 1)])
        );
    }

    #[test]
    fn empty_ratings_are_never_disclosed() {
        assert_eq!(
            aggregate_ratings(&[], threshold(1)),
            Disclosure::Hidden(HiddenReason::NoResponses)
        );
        let all_skipped = ratings(ReviewerCategory::Manager, &[None, None]);
        assert_eq!(
            aggregate_ratings(&all_skipped, threshold(1)),
            Disclosure::Hidden(HiddenReason::NoResponses)
        );
    }

    #[test]
    fn blank_text_is_dropped() {
        let responses = texts(ReviewerCategory::Peer, &["", "  ", "Great job"]);
        assert_eq!(
            aggregate_text_responses(&responses, threshold(1)),
            Disclosure::Visible(vec!["Great job".to_string()])
        );
    }

    #[test]
    fn missing_text_is_dropped() {
        let responses = vec![
            TextResponse {
                text_value: None,
                reviewer_category: ReviewerCategory::Peer,
            },
            TextResponse {
                text_value: Some("\t\n".to_string()),
                reviewer_category: ReviewerCategory::Peer,
            },
        ];
        assert_eq!(
            aggregate_text_responses(&responses, threshold(1)),
            Disclosure::Hidden(HiddenReason::NoResponses)
        );
    }

    #[test]
    fn hidden_text_carries_no_values() {
        let responses = texts(ReviewerCategory::Peer, &["Clear communicator", "Late to standups"]);
        let aggregate = aggregate_text_responses(&responses, threshold(3));
        assert_eq!(
            aggregate,
            Disclosure::Hidden(HiddenReason::BelowThreshold {
                count: 2,
                required: 3
            })
        );
        assert_eq!(aggregate.visible(), None);
    }

    #[test]
    fn text_order_is_shuffled_but_complete() {
        let inputs: Vec<String> = (1..=10).map(|i| format!("comment {i}")).collect();
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let responses = texts(ReviewerCategory::Peer, &refs);
        let expected: BTreeSet<String> = inputs.iter().cloned().collect();

        let mut orders = BTreeSet::new();
        for _ in 0..50 {
            let aggregate = aggregate_text_responses(&responses, threshold(3));
            let shown = aggregate.visible().expect("threshold met").clone();
            assert_eq!(shown.len(), inputs.len());
            assert_eq!(shown.iter().cloned().collect::<BTreeSet<_>>(), expected);
            orders.insert(shown);
        }
        assert!(orders.len() > 1, "text order never changed across trials");
    }

    #[test]
    fn self_and_manager_ignore_cycle_threshold() {
        let mut responses = ratings(ReviewerCategory::Self_, &[Some(3)]);
        responses.extend(ratings(ReviewerCategory::Peer, &[Some(3)]));

        let grouped = group_responses_by_reviewer_type(&responses, threshold(5));
        let own = grouped[&ReviewerCategory::Self_].visible().expect("self visible");
        assert_eq!(own.average, 3.0);
        assert_eq!(own.count, 1);
        assert_eq!(
            grouped[&ReviewerCategory::Peer],
            Disclosure::Hidden(HiddenReason::BelowThreshold {
                count: 1,
                required: 5
            })
        );
    }

    #[test]
    fn grouping_always_returns_every_category() {
        let mut responses = ratings(ReviewerCategory::Self_, &[Some(4)]);
        responses.extend(ratings(ReviewerCategory::Peer, &[Some(4), Some(5), Some(2)]));

        let grouped = group_responses_by_reviewer_type(&responses, threshold(3));
        assert_eq!(grouped.len(), ReviewerCategory::ALL.len());
        assert!(grouped[&ReviewerCategory::Self_].is_visible());
        assert!(grouped[&ReviewerCategory::Peer].is_visible());
        for category in [
            ReviewerCategory::Manager,
            ReviewerCategory::DirectReport,
            ReviewerCategory::External,
        ] {
            assert_eq!(
                grouped[&category],
                Disclosure::Hidden(HiddenReason::NoResponses)
            );
        }
    }

    #[test]
    fn text_grouping_applies_category_thresholds() {
        let mut responses = texts(ReviewerCategory::Manager, &["Strong quarter"]);
        responses.extend(texts(ReviewerCategory::DirectReport, &["Supportive", "Available"]));

        let grouped = group_text_responses_by_reviewer_type(&responses, threshold(3));
        assert_eq!(grouped.len(), 5);
        assert_eq!(
            grouped[&ReviewerCategory::Manager],
            Disclosure::Visible(vec!["Strong quarter".to_string()])
        );
        assert!(!grouped[&ReviewerCategory::DirectReport].is_visible());
    }

    #[test]
    fn overall_score_weighs_categories_equally() {
        let mut responses = ratings(ReviewerCategory::Peer, &[Some(5); 10]);
        responses.extend(ratings(ReviewerCategory::Manager, &[Some(1)]));

        let grouped = group_responses_by_reviewer_type(&responses, threshold(3));
        assert_eq!(
            calculate_overall_score(&grouped),
            Some(OverallScore { score: 3.0 })
        );
    }

    #[test]
    fn overall_score_skips_hidden_categories() {
        let mut responses = ratings(ReviewerCategory::Self_, &[Some(4)]);
        responses.extend(ratings(ReviewerCategory::Peer, &[Some(1), Some(1)]));

        let grouped = group_responses_by_reviewer_type(&responses, threshold(3));
        assert_eq!(
            calculate_overall_score(&grouped),
            Some(OverallScore { score: 4.0 })
        );
    }

    #[test]
    fn aggregation_fans_out_across_threads() {
        let questions: Vec<Vec<RatingResponse>> = (1..=4)
            .map(|value| ratings(ReviewerCategory::Peer, &[Some(value); 3]))
            .collect();

        let averages: Vec<f64> = std::thread::scope(|scope| {
            let handles: Vec<_> = questions
                .iter()
                .map(|responses| {
                    scope.spawn(move || {
                        let grouped = group_responses_by_reviewer_type(responses, threshold(3));
                        calculate_overall_score(&grouped).map(|o| o.score)
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().unwrap())
                .collect()
        });

        assert_eq!(averages, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn overall_score_is_none_without_visible_categories() {
        let responses = ratings(ReviewerCategory::External, &[Some(5), Some(4)]);
        let grouped = group_responses_by_reviewer_type(&responses, threshold(3));
        assert_eq!(calculate_overall_score(&grouped), None);
        assert_eq!(calculate_overall_score(&BTreeMap::new()), None);
    }
}
