//! Quality analysis persistence

use crate::error::StoreError;
use crate::models::{Grade, QualityAnalysis, RecommendedAction};
use sqlx::{Row, SqlitePool};

/// Insert or replace the analysis for a file (one row per file)
pub async fn upsert_analysis(pool: &SqlitePool, qa: &QualityAnalysis) -> Result<i64, StoreError> {
    let defects_json =
        serde_json::to_string(&qa.defects).map_err(|e| StoreError::Io(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO quality_analysis
            (file_id, technical_score, audio_fidelity_score, integrity_score,
             reference_score, final_score, grade, recommended_action, defects,
             health_score, clipping_ratio, silence_ratio)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(file_id) DO UPDATE SET
            technical_score = excluded.technical_score,
            audio_fidelity_score = excluded.audio_fidelity_score,
            integrity_score = excluded.integrity_score,
            reference_score = excluded.reference_score,
            final_score = excluded.final_score,
            grade = excluded.grade,
            recommended_action = excluded.recommended_action,
            defects = excluded.defects,
            health_score = excluded.health_score,
            clipping_ratio = excluded.clipping_ratio,
            silence_ratio = excluded.silence_ratio
        "#,
    )
    .bind(qa.file_id)
    .bind(qa.technical_score)
    .bind(qa.audio_fidelity_score)
    .bind(qa.integrity_score)
    .bind(qa.reference_score)
    .bind(qa.final_score)
    .bind(qa.grade.as_str())
    .bind(qa.recommended_action.as_str())
    .bind(defects_json)
    .bind(qa.health_score)
    .bind(qa.clipping_ratio)
    .bind(qa.silence_ratio)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;

    sqlx::query_scalar("SELECT id FROM quality_analysis WHERE file_id = ?")
        .bind(qa.file_id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)
}

pub async fn get_for_file(
    pool: &SqlitePool,
    file_id: i64,
) -> Result<Option<QualityAnalysis>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, file_id, technical_score, audio_fidelity_score, integrity_score,
               reference_score, final_score, grade, recommended_action, defects,
               health_score, clipping_ratio, silence_ratio
        FROM quality_analysis WHERE file_id = ?
        "#,
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    row.map(|row| {
        let grade_raw: String = row.get("grade");
        let action_raw: String = row.get("recommended_action");
        let defects_raw: String = row.get("defects");
        Ok(QualityAnalysis {
            id: row.get("id"),
            file_id: row.get("file_id"),
            technical_score: row.get("technical_score"),
            audio_fidelity_score: row.get("audio_fidelity_score"),
            integrity_score: row.get("integrity_score"),
            reference_score: row.get("reference_score"),
            final_score: row.get("final_score"),
            grade: Grade::parse(&grade_raw)
                .ok_or_else(|| StoreError::Integrity(format!("unknown grade '{grade_raw}'")))?,
            recommended_action: RecommendedAction::parse(&action_raw).ok_or_else(|| {
                StoreError::Integrity(format!("unknown recommended action '{action_raw}'"))
            })?,
            defects: serde_json::from_str(&defects_raw).unwrap_or_default(),
            health_score: row.get("health_score"),
            clipping_ratio: row.get("clipping_ratio"),
            silence_ratio: row.get("silence_ratio"),
        })
    })
    .transpose()
}
