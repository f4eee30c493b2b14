use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AnonymityThreshold, Cycle, Question, QuestionKind, ResponseRecord, Reviewee, ReviewerCategory,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cycle {cycle:?} has anonymity threshold {stored}, but the row asks for {requested}")]
pub struct ThresholdMismatch {
    cycle: String,
    stored: AnonymityThreshold,
    requested: AnonymityThreshold,
}

/// A cycle's threshold is fixed once the cycle exists; imported rows must agree with it.
pub fn check_cycle_threshold(
    cycle: &str,
    stored: AnonymityThreshold,
    requested: AnonymityThreshold,
) -> Result<(), ThresholdMismatch> {
    if stored == requested {
        Ok(())
    } else {
        Err(ThresholdMismatch {
            cycle: cycle.to_string(),
            stored,
            requested,
        })
    }
}

/// Creates the cycle if missing and returns its id with the stored threshold.
/// An existing cycle keeps its threshold.
async fn ensure_cycle(
    pool: &PgPool,
    name: &str,
    threshold: AnonymityThreshold,
) -> anyhow::Result<(Uuid, AnonymityThreshold)> {
    let row = sqlx::query(
        r#"
        INSERT INTO feedback_360.cycles (id, name, anonymity_threshold)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE
        SET name = EXCLUDED.name
        RETURNING id, anonymity_threshold
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(threshold.get() as i32)
    .fetch_one(pool)
    .await?;

    let stored: i32 = row.get("anonymity_threshold");
    let stored = AnonymityThreshold::new(stored.into())
        .with_context(|| format!("cycle {name:?} has an invalid anonymity threshold"))?;
    Ok((row.get("id"), stored))
}

async fn upsert_person(pool: &PgPool, full_name: &str, email: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO feedback_360.people (id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_question(
    pool: &PgPool,
    cycle_id: Uuid,
    position: i32,
    prompt: &str,
    kind: QuestionKind,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO feedback_360.questions (id, cycle_id, position, prompt, kind)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (cycle_id, position) DO UPDATE
        SET prompt = EXCLUDED.prompt, kind = EXCLUDED.kind
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cycle_id)
    .bind(position)
    .bind(prompt)
    .bind(kind.as_str())
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

struct NewResponse<'a> {
    cycle_id: Uuid,
    question_id: Uuid,
    reviewee_id: Uuid,
    reviewer_category: ReviewerCategory,
    rating_value: Option<i32>,
    text_value: Option<&'a str>,
    completed_at: Option<DateTime<Utc>>,
    source_key: &'a str,
}

async fn insert_response(pool: &PgPool, response: NewResponse<'_>) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO feedback_360.responses
        (id, cycle_id, question_id, reviewee_id, reviewer_category,
         rating_value, text_value, completed_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(response.cycle_id)
    .bind(response.question_id)
    .bind(response.reviewee_id)
    .bind(response.reviewer_category.as_str())
    .bind(response.rating_value)
    .bind(response.text_value)
    .bind(response.completed_at)
    .bind(response.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    use ReviewerCategory::*;

    let threshold = AnonymityThreshold::new(3)?;
    let (cycle_id, stored) = ensure_cycle(pool, "2026 H1", threshold).await?;
    if stored != threshold {
        tracing::warn!(%stored, "seed cycle already exists, keeping its anonymity threshold");
    }

    let reviewees = vec![
        ("Avery Lee", "avery.lee@example.com"),
        ("Jules Moreno", "jules.moreno@example.com"),
    ];
    let mut reviewee_ids = Vec::new();
    for (name, email) in reviewees {
        reviewee_ids.push(upsert_person(pool, name, email).await?);
    }

    let collaboration = upsert_question(
        pool,
        cycle_id,
        1,
        "How effectively does this person collaborate across teams?",
        QuestionKind::Rating,
    )
    .await?;
    let ownership = upsert_question(
        pool,
        cycle_id,
        2,
        "How consistently does this person follow through on commitments?",
        QuestionKind::Rating,
    )
    .await?;
    let comments = upsert_question(
        pool,
        cycle_id,
        3,
        "What should this person keep doing?",
        QuestionKind::Text,
    )
    .await?;

    let completed_at = Utc
        .with_ymd_and_hms(2026, 2, 2, 17, 0, 0)
        .single()
        .context("invalid seed timestamp")?;

    let answers: Vec<(usize, Uuid, ReviewerCategory, Option<i32>, Option<&str>)> = vec![
        (0, collaboration, Self_, Some(4), None),
        (0, collaboration, Manager, Some(5), None),
        (0, collaboration, Peer, Some(4), None),
        (0, collaboration, Peer, Some(5), None),
        (0, collaboration, Peer, Some(3), None),
        (0, collaboration, DirectReport, Some(5), None),
        (0, ownership, Self_, Some(3), None),
        (0, ownership, Manager, Some(4), None),
        (0, ownership, Peer, Some(4), None),
        (0, ownership, Peer, None, None),
        (0, ownership, Peer, Some(5), None),
        (0, comments, Peer, None, Some("Runs the clearest planning meetings on the floor")),
        (0, comments, Peer, None, Some("Always shares context before asking for help")),
        (0, comments, Peer, None, Some("Unblocks the on-call rotation quickly")),
        (0, comments, Manager, None, Some("Keep mentoring the new hires")),
        (1, collaboration, Self_, Some(3), None),
        (1, collaboration, Peer, Some(2), None),
        (1, collaboration, Peer, Some(4), None),
        (1, ownership, Manager, Some(3), None),
        (1, comments, External, None, Some("Responsive on vendor escalations")),
    ];

    for (index, (reviewee, question_id, category, rating_value, text_value)) in
        answers.into_iter().enumerate()
    {
        let source_key = format!("seed-{:03}", index + 1);
        insert_response(
            pool,
            NewResponse {
                cycle_id,
                question_id,
                reviewee_id: reviewee_ids[reviewee],
                reviewer_category: category,
                rating_value,
                text_value,
                completed_at: Some(completed_at),
                source_key: &source_key,
            },
        )
        .await?;
    }

    Ok(())
}

pub async fn fetch_cycle(pool: &PgPool, name: &str) -> anyhow::Result<Cycle> {
    let row = sqlx::query(
        "SELECT id, name, anonymity_threshold FROM feedback_360.cycles WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("cycle {name:?} not found"))?;

    let threshold: i32 = row.get("anonymity_threshold");
    Ok(Cycle {
        id: row.get("id"),
        name: row.get("name"),
        anonymity_threshold: AnonymityThreshold::new(threshold.into())
            .with_context(|| format!("cycle {name:?} has an invalid anonymity threshold"))?,
    })
}

pub async fn fetch_questions(pool: &PgPool, cycle_id: Uuid) -> anyhow::Result<Vec<Question>> {
    let rows = sqlx::query(
        "SELECT id, position, prompt, kind FROM feedback_360.questions \
         WHERE cycle_id = $1 ORDER BY position",
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    let mut questions = Vec::new();
    for row in rows {
        let kind: String = row.get("kind");
        questions.push(Question {
            id: row.get("id"),
            position: row.get("position"),
            prompt: row.get("prompt"),
            kind: kind.parse()?,
        });
    }

    Ok(questions)
}

pub async fn fetch_reviewee(pool: &PgPool, email: &str) -> anyhow::Result<Reviewee> {
    let row = sqlx::query("SELECT id, full_name, email FROM feedback_360.people WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no person with email {email}"))?;

    Ok(Reviewee {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
    })
}

pub async fn fetch_reviewees(pool: &PgPool, cycle_id: Uuid) -> anyhow::Result<Vec<Reviewee>> {
    let rows = sqlx::query(
        "SELECT DISTINCT p.id, p.full_name, p.email \
         FROM feedback_360.people p \
         JOIN feedback_360.responses r ON r.reviewee_id = p.id \
         WHERE r.cycle_id = $1 AND r.completed_at IS NOT NULL \
         ORDER BY p.full_name",
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Reviewee {
            id: row.get("id"),
            full_name: row.get("full_name"),
            email: row.get("email"),
        })
        .collect())
}

/// Completed responses only; drafts never reach aggregation.
pub async fn fetch_responses(
    pool: &PgPool,
    cycle_id: Uuid,
    reviewee_id: Uuid,
) -> anyhow::Result<Vec<ResponseRecord>> {
    let rows = sqlx::query(
        "SELECT question_id, reviewer_category, rating_value, text_value \
         FROM feedback_360.responses \
         WHERE cycle_id = $1 AND reviewee_id = $2 AND completed_at IS NOT NULL",
    )
    .bind(cycle_id)
    .bind(reviewee_id)
    .fetch_all(pool)
    .await?;

    let mut responses = Vec::with_capacity(rows.len());
    for row in rows {
        let category: String = row.get("reviewer_category");
        responses.push(ResponseRecord {
            question_id: row.get("question_id"),
            reviewer_category: category.parse()?,
            rating_value: row.get("rating_value"),
            text_value: row.get("text_value"),
        });
    }

    Ok(responses)
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    cycle: String,
    anonymity_threshold: i64,
    reviewee_name: String,
    reviewee_email: String,
    question_position: i32,
    question_prompt: String,
    question_kind: String,
    reviewer_category: String,
    rating_value: Option<i32>,
    text_value: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    source_key: Option<String>,
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid row {}", line + 2))?;
        let threshold = AnonymityThreshold::new(row.anonymity_threshold)
            .with_context(|| format!("row {}", line + 2))?;
        let category: ReviewerCategory = row
            .reviewer_category
            .parse()
            .with_context(|| format!("row {}", line + 2))?;
        let kind: QuestionKind = row
            .question_kind
            .parse()
            .with_context(|| format!("row {}", line + 2))?;

        let (cycle_id, stored) = ensure_cycle(pool, &row.cycle, threshold).await?;
        check_cycle_threshold(&row.cycle, stored, threshold)
            .with_context(|| format!("row {}", line + 2))?;
        let reviewee_id = upsert_person(pool, &row.reviewee_name, &row.reviewee_email).await?;
        let question_id =
            upsert_question(pool, cycle_id, row.question_position, &row.question_prompt, kind)
                .await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let added = insert_response(
            pool,
            NewResponse {
                cycle_id,
                question_id,
                reviewee_id,
                reviewer_category: category,
                rating_value: row.rating_value,
                text_value: row.text_value.as_deref(),
                completed_at: row.completed_at,
                source_key: &source_key,
            },
        )
        .await?;

        if added {
            inserted += 1;
        } else {
            tracing::debug!(%source_key, "response already imported");
        }
    }

    Ok(inserted)
}
