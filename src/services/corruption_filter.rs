//! Corruption filter
//!
//! Splits the analyzed stream into healthy and quarantine sets before
//! duplicate grouping, so a corrupted file can never be elected the best
//! version of anything. The grouper's input is exactly the set of files
//! this filter passes.

use crate::config::CleanupConfig;
use crate::models::QualityAnalysis;

/// Reported clipping above this ratio quarantines the file
const MAX_CLIPPING_RATIO: f64 = 0.05;
/// Reported silence above this ratio quarantines the file
const MAX_SILENCE_RATIO: f64 = 0.80;

/// Outcome for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Healthy,
    /// Critically corrupted, with the reasons that tripped
    Quarantine(Vec<String>),
}

pub struct CorruptionFilter {
    min_health_score: i64,
    critical_defects: Vec<String>,
    min_duration_sec: f64,
    max_duration_sec: f64,
}

impl CorruptionFilter {
    pub fn from_config(config: &CleanupConfig) -> Self {
        Self {
            min_health_score: config.min_health_score as i64,
            critical_defects: config.critical_defects.clone(),
            min_duration_sec: config.min_duration_sec,
            max_duration_sec: config.max_duration_sec,
        }
    }

    /// Classify one analyzed file. `duration_sec` comes from the
    /// fingerprint when available, else from the defect probe; None skips
    /// the duration rule.
    pub fn classify(
        &self,
        analysis: &QualityAnalysis,
        duration_sec: Option<f64>,
    ) -> FilterVerdict {
        let mut reasons = Vec::new();

        if analysis.health_score < self.min_health_score {
            reasons.push(format!(
                "health score {} below minimum {}",
                analysis.health_score, self.min_health_score
            ));
        }

        for defect in &analysis.defects {
            if self.critical_defects.iter().any(|c| c == defect) {
                reasons.push(format!("critical defect: {defect}"));
            }
        }

        if let Some(duration) = duration_sec {
            if duration < self.min_duration_sec {
                reasons.push(format!(
                    "duration {duration:.1}s below minimum {:.1}s",
                    self.min_duration_sec
                ));
            } else if duration > self.max_duration_sec {
                reasons.push(format!(
                    "duration {duration:.1}s above maximum {:.1}s",
                    self.max_duration_sec
                ));
            }
        }

        if let Some(clipping) = analysis.clipping_ratio {
            if clipping > MAX_CLIPPING_RATIO {
                reasons.push(format!("clipping ratio {:.1}%", clipping * 100.0));
            }
        }
        if let Some(silence) = analysis.silence_ratio {
            if silence > MAX_SILENCE_RATIO {
                reasons.push(format!("silence ratio {:.0}%", silence * 100.0));
            }
        }

        if reasons.is_empty() {
            FilterVerdict::Healthy
        } else {
            FilterVerdict::Quarantine(reasons)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, RecommendedAction};
    use std::path::PathBuf;

    fn filter() -> CorruptionFilter {
        CorruptionFilter::from_config(&CleanupConfig {
            source_roots: vec![PathBuf::from("/in")],
            ..Default::default()
        })
    }

    fn analysis() -> QualityAnalysis {
        QualityAnalysis {
            id: 0,
            file_id: 1,
            technical_score: 90.0,
            audio_fidelity_score: 80.0,
            integrity_score: 100.0,
            reference_score: None,
            final_score: 85.0,
            grade: Grade::AMinus,
            recommended_action: RecommendedAction::Keep,
            defects: vec![],
            health_score: 95,
            clipping_ratio: None,
            silence_ratio: None,
        }
    }

    #[test]
    fn test_clean_file_is_healthy() {
        assert_eq!(filter().classify(&analysis(), Some(200.0)), FilterVerdict::Healthy);
    }

    #[test]
    fn test_low_health_score_quarantines() {
        let mut qa = analysis();
        qa.health_score = 49;
        match filter().classify(&qa, Some(200.0)) {
            FilterVerdict::Quarantine(reasons) => {
                assert!(reasons[0].contains("health score"));
            }
            other => panic!("expected quarantine, got {other:?}"),
        }
    }

    #[test]
    fn test_critical_defect_quarantines() {
        let mut qa = analysis();
        qa.defects = vec!["truncation".into()];
        assert!(matches!(
            filter().classify(&qa, Some(200.0)),
            FilterVerdict::Quarantine(_)
        ));
    }

    #[test]
    fn test_non_critical_defect_passes() {
        let mut qa = analysis();
        qa.defects = vec!["clipping".into()];
        assert_eq!(filter().classify(&qa, Some(200.0)), FilterVerdict::Healthy);
    }

    #[test]
    fn test_duration_bounds() {
        let f = filter();
        assert!(matches!(
            f.classify(&analysis(), Some(5.0)),
            FilterVerdict::Quarantine(_)
        ));
        assert!(matches!(
            f.classify(&analysis(), Some(4000.0)),
            FilterVerdict::Quarantine(_)
        ));
        // Unknown duration skips the rule
        assert_eq!(f.classify(&analysis(), None), FilterVerdict::Healthy);
    }

    #[test]
    fn test_clipping_and_silence_ratios() {
        let f = filter();
        let mut qa = analysis();
        qa.clipping_ratio = Some(0.06);
        assert!(matches!(f.classify(&qa, Some(200.0)), FilterVerdict::Quarantine(_)));

        let mut qa = analysis();
        qa.silence_ratio = Some(0.9);
        assert!(matches!(f.classify(&qa, Some(200.0)), FilterVerdict::Quarantine(_)));

        let mut qa = analysis();
        qa.clipping_ratio = Some(0.05);
        qa.silence_ratio = Some(0.80);
        assert_eq!(f.classify(&qa, Some(200.0)), FilterVerdict::Healthy);
    }

    #[test]
    fn test_multiple_reasons_accumulate() {
        let mut qa = analysis();
        qa.health_score = 10;
        qa.defects = vec!["truncation".into(), "header_corruption".into()];
        match filter().classify(&qa, Some(2.0)) {
            FilterVerdict::Quarantine(reasons) => assert!(reasons.len() >= 3),
            other => panic!("expected quarantine, got {other:?}"),
        }
    }
}
