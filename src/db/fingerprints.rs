//! Fingerprint and metadata interning
//!
//! Both tables are content-addressed: many files share one row. Inserts
//! are insert-or-fetch so replays and duplicates never multiply rows.

use crate::error::StoreError;
use crate::models::{FingerprintRow, MetadataRow, MetadataSource};
use sqlx::{Row, SqlitePool};

/// Insert a fingerprint if unseen, returning the row id either way
pub async fn intern_fingerprint(
    pool: &SqlitePool,
    fp: &FingerprintRow,
) -> Result<i64, StoreError> {
    sqlx::query(
        r#"
        INSERT INTO fingerprints
            (fingerprint, duration_sec, sample_rate_hz, bit_depth, channels, codec, bitrate_kbps)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fingerprint) DO NOTHING
        "#,
    )
    .bind(&fp.fingerprint)
    .bind(fp.duration_sec)
    .bind(fp.sample_rate_hz)
    .bind(fp.bit_depth)
    .bind(fp.channels)
    .bind(&fp.codec)
    .bind(fp.bitrate_kbps)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;

    sqlx::query_scalar("SELECT id FROM fingerprints WHERE fingerprint = ?")
        .bind(&fp.fingerprint)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)
}

pub async fn get_fingerprint(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<FingerprintRow>, StoreError> {
    let row = sqlx::query(
        "SELECT id, fingerprint, duration_sec, sample_rate_hz, bit_depth, channels, codec, bitrate_kbps \
         FROM fingerprints WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    Ok(row.map(|row| FingerprintRow {
        id: row.get("id"),
        fingerprint: row.get("fingerprint"),
        duration_sec: row.get("duration_sec"),
        sample_rate_hz: row.get("sample_rate_hz"),
        bit_depth: row.get("bit_depth"),
        channels: row.get("channels"),
        codec: row.get("codec"),
        bitrate_kbps: row.get("bitrate_kbps"),
    }))
}

/// Insert a metadata row if no identical one exists, returning the row id
pub async fn intern_metadata(pool: &SqlitePool, meta: &MetadataRow) -> Result<i64, StoreError> {
    let existing: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM metadata
        WHERE artist IS ? AND title IS ? AND album IS ? AND year IS ?
          AND genre IS ? AND track_number IS ? AND disc_number IS ? AND source = ?
        LIMIT 1
        "#,
    )
    .bind(&meta.artist)
    .bind(&meta.title)
    .bind(&meta.album)
    .bind(meta.year)
    .bind(&meta.genre)
    .bind(meta.track_number)
    .bind(meta.disc_number)
    .bind(meta.source.as_str())
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO metadata (artist, title, album, year, genre, track_number, disc_number, source)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&meta.artist)
    .bind(&meta.title)
    .bind(&meta.album)
    .bind(meta.year)
    .bind(&meta.genre)
    .bind(meta.track_number)
    .bind(meta.disc_number)
    .bind(meta.source.as_str())
    .execute(pool)
    .await
    .map_err(StoreError::from)?;

    Ok(result.last_insert_rowid())
}

pub async fn get_metadata(pool: &SqlitePool, id: i64) -> Result<Option<MetadataRow>, StoreError> {
    let row = sqlx::query(
        "SELECT id, artist, title, album, year, genre, track_number, disc_number, source \
         FROM metadata WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    row.map(|row| {
        let source_raw: String = row.get("source");
        let source = MetadataSource::parse(&source_raw)
            .ok_or_else(|| StoreError::Integrity(format!("unknown metadata source '{source_raw}'")))?;
        Ok(MetadataRow {
            id: row.get("id"),
            artist: row.get("artist"),
            title: row.get("title"),
            album: row.get("album"),
            year: row.get("year"),
            genre: row.get("genre"),
            track_number: row.get("track_number"),
            disc_number: row.get("disc_number"),
            source,
        })
    })
    .transpose()
}
