use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::aggregate;
use crate::models::{
    AggregatedRating, AnonymityThreshold, CategoryResult, Cycle, Disclosure, HiddenReason,
    OverallScore, Question, QuestionKind, RatingAggregate, RatingResponse, ResponseRecord,
    Reviewee, ReviewerCategory, TextResponse,
};

#[derive(Debug, Clone, Serialize)]
pub struct QuestionReport {
    pub question: Question,
    pub categories: Vec<CategoryResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevieweeReport {
    pub cycle: String,
    pub reviewee_name: String,
    pub reviewee_email: String,
    pub anonymity_threshold: AnonymityThreshold,
    pub questions: Vec<QuestionReport>,
    pub category_summary: BTreeMap<ReviewerCategory, RatingAggregate>,
    pub overall: Option<OverallScore>,
}

#[derive(Debug, Clone)]
pub struct RevieweeScore {
    pub reviewee_name: String,
    pub reviewee_email: String,
    pub overall: Option<OverallScore>,
    pub visible_categories: usize,
}

pub fn build_reviewee_report(
    cycle: &Cycle,
    reviewee: &Reviewee,
    questions: &[Question],
    responses: &[ResponseRecord],
) -> RevieweeReport {
    let threshold = cycle.anonymity_threshold;
    let mut question_reports = Vec::with_capacity(questions.len());
    let mut rating_groups = Vec::new();

    for question in questions {
        let answers = responses.iter().filter(|r| r.question_id == question.id);

        let categories = match question.kind {
            QuestionKind::Rating => {
                let ratings: Vec<RatingResponse> = answers
                    .map(|r| RatingResponse {
                        rating_value: r.rating_value,
                        reviewer_category: r.reviewer_category,
                    })
                    .collect();
                let grouped = aggregate::group_responses_by_reviewer_type(&ratings, threshold);
                let results = grouped
                    .iter()
                    .map(|(category, rating)| CategoryResult {
                        category: *category,
                        rating: Some(rating.clone()),
                        text: None,
                    })
                    .collect();
                rating_groups.push(grouped);
                results
            }
            QuestionKind::Text => {
                let texts: Vec<TextResponse> = answers
                    .map(|r| TextResponse {
                        text_value: r.text_value.clone(),
                        reviewer_category: r.reviewer_category,
                    })
                    .collect();
                aggregate::group_text_responses_by_reviewer_type(&texts, threshold)
                    .into_iter()
                    .map(|(category, text)| CategoryResult {
                        category,
                        rating: None,
                        text: Some(text),
                    })
                    .collect()
            }
        };

        question_reports.push(QuestionReport {
            question: question.clone(),
            categories,
        });
    }

    let category_summary = summarize_categories(&rating_groups);
    let overall = aggregate::calculate_overall_score(&category_summary);
    tracing::debug!(
        reviewee = %reviewee.email,
        questions = question_reports.len(),
        visible_categories = category_summary.values().filter(|r| r.is_visible()).count(),
        "built reviewee report"
    );

    RevieweeReport {
        cycle: cycle.name.clone(),
        reviewee_name: reviewee.full_name.clone(),
        reviewee_email: reviewee.email.clone(),
        anonymity_threshold: threshold,
        questions: question_reports,
        category_summary,
        overall,
    }
}

/// Combines per-question category results into one result per category.
///
/// Only already-visible question results contribute, so a category whose
/// respondents never clear the threshold on any single question stays
/// hidden even if its raw response count across questions would.
pub fn summarize_categories(
    per_question: &[BTreeMap<ReviewerCategory, RatingAggregate>],
) -> BTreeMap<ReviewerCategory, RatingAggregate> {
    ReviewerCategory::ALL
        .into_iter()
        .map(|category| {
            let results: Vec<&RatingAggregate> = per_question
                .iter()
                .filter_map(|grouped| grouped.get(&category))
                .collect();
            (category, summarize_category(&results))
        })
        .collect()
}

fn summarize_category(results: &[&RatingAggregate]) -> RatingAggregate {
    let visible: Vec<&AggregatedRating> = results.iter().filter_map(|r| (*r).visible()).collect();

    if visible.is_empty() {
        let reason = results
            .iter()
            .filter_map(|r| r.hidden_reason())
            .max_by_key(|reason| match reason {
                HiddenReason::NoResponses => 0,
                HiddenReason::BelowThreshold { count, .. } => *count,
            })
            .unwrap_or(HiddenReason::NoResponses);
        return Disclosure::Hidden(reason);
    }

    let mut distribution = BTreeMap::new();
    for rating in &visible {
        for (value, occurrences) in &rating.distribution {
            *distribution.entry(*value).or_insert(0usize) += occurrences;
        }
    }

    let total: f64 = visible.iter().map(|r| r.average).sum();
    Disclosure::Visible(AggregatedRating {
        average: aggregate::round2(total / visible.len() as f64),
        count: visible.iter().map(|r| r.count).max().unwrap_or(0),
        distribution,
    })
}

pub fn rank_reviewees(reports: &[RevieweeReport]) -> Vec<RevieweeScore> {
    let mut scores: Vec<RevieweeScore> = reports
        .iter()
        .map(|report| RevieweeScore {
            reviewee_name: report.reviewee_name.clone(),
            reviewee_email: report.reviewee_email.clone(),
            overall: report.overall,
            visible_categories: report
                .category_summary
                .values()
                .filter(|r| r.is_visible())
                .count(),
        })
        .collect();

    scores.sort_by(|a, b| {
        let a_score = a.overall.map(|o| o.score).unwrap_or(f64::NEG_INFINITY);
        let b_score = b.overall.map(|o| o.score).unwrap_or(f64::NEG_INFINITY);
        b_score
            .partial_cmp(&a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.reviewee_name.cmp(&b.reviewee_name))
    });
    scores
}

pub fn render_json(report: &RevieweeReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn render_markdown(report: &RevieweeReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# 360° Feedback Report: {}", report.reviewee_name);
    let _ = writeln!(
        output,
        "Cycle {} (categories need {} responses to be shown; self and manager always shown)",
        report.cycle, report.anonymity_threshold
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall");

    match report.overall {
        Some(overall) => {
            let _ = writeln!(output, "Overall score {:.2}", overall.score);
        }
        None => {
            let _ = writeln!(output, "Not enough data for an overall score.");
        }
    }

    let _ = writeln!(output);
    for (category, result) in &report.category_summary {
        write_rating_line(&mut output, *category, result);
    }

    for question_report in &report.questions {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "## {}. {}",
            question_report.question.position, question_report.question.prompt
        );

        for result in &question_report.categories {
            if !result.is_visible() {
                let message = result
                    .message()
                    .unwrap_or_else(|| HiddenReason::NoResponses.message());
                let _ = writeln!(output, "- {}: {}", result.category.label(), message);
                continue;
            }
            if let Some(rating) = &result.rating {
                write_rating_line(&mut output, result.category, rating);
            }
            if let Some(comments) = result.text.as_ref().and_then(Disclosure::visible) {
                let _ = writeln!(output, "- {}:", result.category.label());
                for comment in comments {
                    let _ = writeln!(output, "  - {}", comment.trim());
                }
            }
        }
    }

    output
}

fn write_rating_line(output: &mut String, category: ReviewerCategory, result: &RatingAggregate) {
    match result {
        Disclosure::Visible(rating) => {
            let spread: Vec<String> = rating
                .distribution
                .iter()
                .map(|(value, count)| format!("{value}×{count}"))
                .collect();
            let _ = writeln!(
                output,
                "- {}: {:.2} from {} responses ({})",
                category.label(),
                rating.average,
                rating.count,
                spread.join(", ")
            );
        }
        Disclosure::Hidden(reason) => {
            let _ = writeln!(output, "- {}: {}", category.label(), reason.message());
        }
    }
}
