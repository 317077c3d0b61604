use std::collections::HashMap;

use anyhow::Context;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::graph::DependencyGraph;
use crate::models::{Chapter, DependencyEdge, GradeRecord, Snapshot, StudentRecord};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const SEED_CHAPTERS: [&str; 10] = [
    "Algebra Basics",
    "Linear Equations",
    "Inequalities",
    "Functions",
    "Polynomials",
    "Quadratic Equations",
    "Exponential Functions",
    "Logarithmic Functions",
    "Trigonometry Basics",
    "Trigonometric Functions",
];

const SEED_DEPENDENCIES: [(&str, &str); 10] = [
    ("Linear Equations", "Algebra Basics"),
    ("Inequalities", "Algebra Basics"),
    ("Functions", "Algebra Basics"),
    ("Polynomials", "Algebra Basics"),
    ("Quadratic Equations", "Polynomials"),
    ("Quadratic Equations", "Linear Equations"),
    ("Exponential Functions", "Functions"),
    ("Logarithmic Functions", "Exponential Functions"),
    ("Trigonometric Functions", "Trigonometry Basics"),
    ("Trigonometric Functions", "Functions"),
];

const SEED_STUDENTS: [(&str, &str, &str); 8] = [
    ("Avery Lee", "avery.lee@example.edu", "10A"),
    ("Jules Moreno", "jules.moreno@example.edu", "10A"),
    ("Kiara Patel", "kiara.patel@example.edu", "10A"),
    ("Tomas Riva", "tomas.riva@example.edu", "10A"),
    ("Dewi Safitri", "dewi.safitri@example.edu", "10B"),
    ("Budi Santoso", "budi.santoso@example.edu", "10B"),
    ("Nina Agustina", "nina.agustina@example.edu", "10B"),
    ("Farhan Saputra", "farhan.saputra@example.edu", "10B"),
];

/// Loads a realistic curriculum and roster. Grades are generated in
/// dependency order with a seeded rng, so each student's prerequisite scores
/// exist before the scores that build on them and reruns produce the same
/// data. Each student only covers a prefix of the curriculum, leaving
/// unattempted chapters for the recommender to work on.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let mut chapter_ids: HashMap<&str, Uuid> = HashMap::new();
    for name in SEED_CHAPTERS {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO chapter_mastery.chapters (id, name)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(pool)
        .await?
        .get("id");
        chapter_ids.insert(name, id);
    }

    for (chapter, prerequisite) in SEED_DEPENDENCIES {
        sqlx::query(
            r#"
            INSERT INTO chapter_mastery.chapter_dependencies (id, chapter_id, prerequisite_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (chapter_id, prerequisite_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(chapter_ids[chapter])
        .bind(chapter_ids[prerequisite])
        .execute(pool)
        .await?;
    }

    let mut student_ids = Vec::new();
    for (full_name, email, class_label) in SEED_STUDENTS {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO chapter_mastery.students (id, full_name, email, class_label)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_label = EXCLUDED.class_label
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(full_name)
        .bind(email)
        .bind(class_label)
        .fetch_one(pool)
        .await?
        .get("id");
        student_ids.push((id, class_label));
    }

    // Grade generation follows the dependency order so that a chapter's
    // prerequisites are always the ones graded earlier in the prefix.
    let chapters: Vec<Chapter> = SEED_CHAPTERS
        .iter()
        .map(|name| Chapter {
            id: chapter_ids[name],
            name: name.to_string(),
        })
        .collect();
    let edges: Vec<DependencyEdge> = SEED_DEPENDENCIES
        .iter()
        .map(|(chapter, prerequisite)| DependencyEdge {
            chapter_id: chapter_ids[chapter],
            prerequisite_id: chapter_ids[prerequisite],
        })
        .collect();
    let graph = DependencyGraph::from_snapshot(&chapters, &edges)
        .context("seed curriculum failed integrity check")?;
    let ordered = graph.topological_order(&chapters);

    let mut rng = StdRng::seed_from_u64(7);
    let term_start = NaiveDate::from_ymd_opt(2026, 1, 12).context("invalid term start")?;

    for (index, (student_id, class_label)) in student_ids.iter().enumerate() {
        let base_ability: f64 = if *class_label == "10A" {
            rng.gen_range(75.0..95.0)
        } else {
            rng.gen_range(70.0..90.0)
        };
        let covered = 5 + index % 4;

        for (position, chapter) in ordered.iter().take(covered).enumerate() {
            let adjustment = match position % 4 {
                0 => 5.0,
                3 => -5.0,
                _ => 0.0,
            };
            let score = (base_ability + adjustment + rng.gen_range(-10.0..10.0))
                .round()
                .clamp(50.0, 99.0);
            let recorded_at = term_start + Duration::days((position * 7) as i64);

            sqlx::query(
                r#"
                INSERT INTO chapter_mastery.grades (id, student_id, chapter_id, score, recorded_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (student_id, chapter_id) DO UPDATE
                SET score = EXCLUDED.score, recorded_at = EXCLUDED.recorded_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(chapter.id)
            .bind(score)
            .bind(recorded_at)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// One consistent read of everything the engine needs, inside a single
/// repeatable-read transaction so a concurrent grade write cannot produce a
/// torn view of the data.
pub async fn fetch_snapshot(pool: &PgPool) -> anyhow::Result<Snapshot> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;

    let chapters = sqlx::query("SELECT id, name FROM chapter_mastery.chapters ORDER BY id")
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| Chapter {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect();

    let edges = sqlx::query(
        "SELECT chapter_id, prerequisite_id FROM chapter_mastery.chapter_dependencies \
         ORDER BY chapter_id, prerequisite_id",
    )
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|row| DependencyEdge {
        chapter_id: row.get("chapter_id"),
        prerequisite_id: row.get("prerequisite_id"),
    })
    .collect();

    let students = sqlx::query(
        "SELECT id, full_name, email, class_label FROM chapter_mastery.students ORDER BY id",
    )
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|row| StudentRecord {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        class_label: row.get("class_label"),
    })
    .collect();

    let grades = sqlx::query(
        "SELECT student_id, chapter_id, score, recorded_at FROM chapter_mastery.grades \
         ORDER BY student_id, chapter_id",
    )
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|row| GradeRecord {
        student_id: row.get("student_id"),
        chapter_id: row.get("chapter_id"),
        score: row.get("score"),
        recorded_at: row.get("recorded_at"),
    })
    .collect();

    tx.commit().await?;

    Ok(Snapshot {
        chapters,
        edges,
        students,
        grades,
    })
}

pub async fn student_id_by_email(pool: &PgPool, email: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM chapter_mastery.students WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no student with email {email}"))?;
    Ok(row.get("id"))
}

pub async fn chapter_id_by_name(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM chapter_mastery.chapters WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no chapter named {name}"))?;
    Ok(row.get("id"))
}

/// Records or replaces one grade. Score validation lives here at the entry
/// boundary; the engine assumes scores are already in range.
pub async fn upsert_grade(
    pool: &PgPool,
    email: &str,
    chapter_name: &str,
    score: f64,
    recorded_at: NaiveDate,
) -> anyhow::Result<()> {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        anyhow::bail!("score must be a number between 0 and 100, got {score}");
    }

    let student_id = student_id_by_email(pool, email).await?;
    let chapter_id = chapter_id_by_name(pool, chapter_name).await?;

    sqlx::query(
        r#"
        INSERT INTO chapter_mastery.grades (id, student_id, chapter_id, score, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id, chapter_id) DO UPDATE
        SET score = EXCLUDED.score, recorded_at = EXCLUDED.recorded_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(chapter_id)
    .bind(score)
    .bind(recorded_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Imports grade rows from a CSV file, upserting students along the way.
/// Chapters are resolved by name and must already exist; an unknown chapter
/// name aborts the import rather than silently dropping rows.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        class_label: String,
        chapter: String,
        score: f64,
        recorded_at: NaiveDate,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if !row.score.is_finite() || !(0.0..=100.0).contains(&row.score) {
            anyhow::bail!(
                "row for {} / {}: score must be between 0 and 100, got {}",
                row.email,
                row.chapter,
                row.score
            );
        }

        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO chapter_mastery.students (id, full_name, email, class_label)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_label = EXCLUDED.class_label
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(&row.email)
        .bind(&row.class_label)
        .fetch_one(pool)
        .await?
        .get("id");

        let chapter_id = chapter_id_by_name(pool, &row.chapter).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO chapter_mastery.grades (id, student_id, chapter_id, score, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, chapter_id) DO UPDATE
            SET score = EXCLUDED.score, recorded_at = EXCLUDED.recorded_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(chapter_id)
        .bind(row.score)
        .bind(row.recorded_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
