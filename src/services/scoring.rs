//! Quality scoring
//!
//! A pure function of its recorded inputs: replaying scoring on the same
//! inputs yields the same score and grade. Four weighted components, each
//! in [0, 100]:
//!
//! - technical (format, bitrate, sample rate)
//! - audio fidelity (dynamic range, clipping, spectral cutoff, noise floor)
//! - integrity (100 minus defect penalties)
//! - reference (closeness to the best known version; neutral 70 without one)
//!
//! Primary selection within a duplicate group uses the final score with a
//! total tie-break order, so election is deterministic regardless of
//! worker scheduling.

use crate::config::QualityWeights;
use crate::extractors::ReferenceVersion;
use crate::models::{Grade, QualityAnalysis, RecommendedAction};
use std::cmp::Ordering;

/// Fidelity inputs as reported by the defect detector; absent components
/// do not count against the file.
#[derive(Debug, Clone, Default)]
pub struct FidelityInputs {
    pub dynamic_range_db: Option<f64>,
    pub clipping_ratio: Option<f64>,
    pub silence_ratio: Option<f64>,
    pub spectral_cutoff_hz: Option<f64>,
    pub noise_floor_db: Option<f64>,
}

/// Neutral reference score when no lookup is configured or nothing matches
pub const NEUTRAL_REFERENCE_SCORE: f64 = 70.0;

/// Format + bitrate + sample-rate score
pub fn technical_score(codec: &str, bitrate_kbps: u32, sample_rate_hz: u32) -> f64 {
    let format_base: f64 = match codec.to_ascii_lowercase().as_str() {
        "flac" => 100.0,
        "wav" => 98.0,
        "alac" => 95.0,
        "aiff" => 96.0,
        "mp3" => match bitrate_kbps {
            b if b >= 320 => 90.0,
            b if b >= 256 => 80.0,
            b if b >= 192 => 70.0,
            b if b >= 160 => 60.0,
            b if b >= 128 => 50.0,
            _ => 35.0,
        },
        "ogg" | "aac" | "m4a" | "opus" => match bitrate_kbps {
            b if b >= 256 => 85.0,
            b if b >= 192 => 75.0,
            b if b >= 160 => 65.0,
            b if b >= 128 => 55.0,
            _ => 40.0,
        },
        "wma" => 60.0,
        _ => 50.0,
    };

    let sample_rate_adjust = if sample_rate_hz >= 44_100 {
        0.0
    } else if sample_rate_hz >= 22_050 {
        -10.0
    } else if sample_rate_hz > 0 {
        -25.0
    } else {
        -5.0 // unknown sample rate
    };

    (format_base + sample_rate_adjust).clamp(0.0, 100.0)
}

/// Average of the reported fidelity components; neutral 70 when nothing
/// was reported.
pub fn fidelity_score(inputs: &FidelityInputs) -> f64 {
    let mut components = Vec::with_capacity(5);

    if let Some(dr) = inputs.dynamic_range_db {
        // 4 dB (brickwalled) → 40, 14 dB (dynamic) → 100
        components.push(((dr - 4.0) / 10.0 * 60.0 + 40.0).clamp(0.0, 100.0));
    }
    if let Some(clipping) = inputs.clipping_ratio {
        components.push((100.0 - clipping * 800.0).clamp(0.0, 100.0));
    }
    if let Some(silence) = inputs.silence_ratio {
        components.push((100.0 - (silence - 0.2).max(0.0) * 125.0).clamp(0.0, 100.0));
    }
    if let Some(cutoff) = inputs.spectral_cutoff_hz {
        // 11 kHz (heavily lossy) → 40, 20 kHz (full band) → 100
        components.push(((cutoff - 11_000.0) / 9_000.0 * 60.0 + 40.0).clamp(0.0, 100.0));
    }
    if let Some(noise) = inputs.noise_floor_db {
        // -80 dB → 100, -40 dB → 40
        components.push(((-noise - 40.0) / 40.0 * 60.0 + 40.0).clamp(0.0, 100.0));
    }

    if components.is_empty() {
        70.0
    } else {
        components.iter().sum::<f64>() / components.len() as f64
    }
}

fn defect_penalty(code: &str) -> f64 {
    match code {
        "header_corruption" => 60.0,
        "truncation" => 50.0,
        "complete_silence" => 70.0,
        "decode_failure" => 60.0,
        "metadata_unreadable" => 25.0,
        "sync_errors" => 40.0,
        "encoding_errors" => 40.0,
        "clipping" => 15.0,
        _ => 10.0,
    }
}

/// 100 minus accumulated defect penalties, floored at 0
pub fn integrity_score(defects: &[String]) -> f64 {
    let total: f64 = defects.iter().map(|d| defect_penalty(d)).sum();
    (100.0 - total).max(0.0)
}

/// Closeness of this file's technical class to the best known reference
pub fn reference_score(
    own_technical: f64,
    references: Option<&[ReferenceVersion]>,
) -> Option<f64> {
    let references = references?;
    let best = references
        .iter()
        .map(|r| technical_score(&r.format, r.bitrate_kbps, 44_100))
        .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.max(s))))?;
    if best <= 0.0 {
        return Some(100.0);
    }
    Some((own_technical / best * 100.0).min(100.0))
}

/// Weighted final score rounded to one decimal
pub fn final_score(
    weights: &QualityWeights,
    technical: f64,
    fidelity: f64,
    integrity: f64,
    reference: Option<f64>,
) -> f64 {
    let reference = reference.unwrap_or(NEUTRAL_REFERENCE_SCORE);
    let raw = weights.technical * technical
        + weights.fidelity * fidelity
        + weights.integrity * integrity
        + weights.reference * reference;
    (raw * 10.0).round() / 10.0
}

/// Action implied by the final score; the corruption filter and grouper
/// may override to quarantine / delete_duplicate later.
pub fn action_for_score(score: f64) -> RecommendedAction {
    if score >= 70.0 {
        RecommendedAction::Keep
    } else if score >= 50.0 {
        RecommendedAction::Replace
    } else {
        RecommendedAction::Quarantine
    }
}

/// Assemble the full analysis row for a file
#[allow(clippy::too_many_arguments)]
pub fn analyze(
    weights: &QualityWeights,
    file_id: i64,
    codec: &str,
    bitrate_kbps: u32,
    sample_rate_hz: u32,
    fidelity: &FidelityInputs,
    defects: Vec<String>,
    health_score: i64,
    references: Option<&[ReferenceVersion]>,
) -> QualityAnalysis {
    let technical = technical_score(codec, bitrate_kbps, sample_rate_hz);
    let fidelity_value = fidelity_score(fidelity);
    let integrity = integrity_score(&defects);
    let reference = reference_score(technical, references);
    let final_value = final_score(weights, technical, fidelity_value, integrity, reference);

    QualityAnalysis {
        id: 0,
        file_id,
        technical_score: technical,
        audio_fidelity_score: fidelity_value,
        integrity_score: integrity,
        reference_score: reference,
        final_score: final_value,
        grade: Grade::from_score(final_value),
        recommended_action: action_for_score(final_value),
        defects,
        health_score,
        clipping_ratio: fidelity.clipping_ratio,
        silence_ratio: fidelity.silence_ratio,
    }
}

/// Everything the primary election needs to know about one group member
#[derive(Debug, Clone)]
pub struct PrimaryCandidate {
    pub file_id: i64,
    pub final_score: f64,
    pub codec: String,
    pub bitrate_kbps: u32,
    pub size_bytes: i64,
    pub path: String,
}

/// Total order for primary selection, best candidate first: final score,
/// then configured format priority, then bitrate, then size, then path.
pub fn compare_candidates(
    a: &PrimaryCandidate,
    b: &PrimaryCandidate,
    format_priority: &[String],
) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            format_rank(&a.codec, format_priority).cmp(&format_rank(&b.codec, format_priority))
        })
        .then_with(|| b.bitrate_kbps.cmp(&a.bitrate_kbps))
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        .then_with(|| a.path.cmp(&b.path))
}

fn format_rank(codec: &str, format_priority: &[String]) -> usize {
    let codec = codec.to_ascii_lowercase();
    format_priority
        .iter()
        .position(|f| f.eq_ignore_ascii_case(&codec))
        .unwrap_or(format_priority.len())
}
