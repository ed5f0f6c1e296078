use crate::config::RiskThresholds;
use crate::types::{OperationKind, RepoState, RiskAssessment, RiskLevel};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Deterministic additive risk scoring. Pure: reads only the arguments,
/// and the score is independent of target path ordering.
#[derive(Clone, Debug, Default)]
pub struct RiskAssessor {
    thresholds: RiskThresholds,
}

fn critical_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(main|index|app|server|config)\.[A-Za-z0-9]+$")
            .expect("critical file pattern should compile")
    })
}

impl RiskAssessor {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Score one proposed operation. Reads only the arguments: the
    /// missing-tests factor looks for test files among `target_paths`
    /// themselves, not the wider repository, so callers wanting credit
    /// for existing tests must include them in the target set.
    pub fn assess(
        &self,
        kind: OperationKind,
        target_paths: &[impl AsRef<Path>],
        repo: &RepoState,
    ) -> RiskAssessment {
        let mut score = 0u32;
        let mut factors = Vec::new();

        let base = match kind {
            OperationKind::Verify => 0,
            OperationKind::Format => 1,
            OperationKind::Cleanup => 3,
            OperationKind::Dedupe => 4,
            OperationKind::Unknown => 5,
        };
        score += base;
        factors.push(format!("base score {} for {} operation", base, kind.as_str()));

        let count = target_paths.len();
        if count > 100 {
            score += 2;
            factors.push(format!("large target set ({count} files)"));
        } else if count > 20 {
            score += 1;
            factors.push(format!("moderate target set ({count} files)"));
        }

        // Capped at one contribution no matter how many entrypoints match.
        if let Some(name) = target_paths.iter().find_map(|path| {
            let path = path.as_ref();
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .filter(|n| critical_file_pattern().is_match(n))
        }) {
            score += 2;
            factors.push(format!("targets critical file {name}"));
        }

        if repo.has_uncommitted_changes {
            score += 1;
            factors.push("repository has uncommitted changes".to_string());
        }

        if !target_paths.iter().any(|path| is_test_path(path.as_ref())) {
            score += 1;
            factors.push("no test files among targets".to_string());
        }

        RiskAssessment {
            kind,
            score,
            level: self.level_for(score),
            factors,
        }
    }

    fn level_for(&self, score: u32) -> RiskLevel {
        if score >= self.thresholds.critical {
            RiskLevel::Critical
        } else if score >= self.thresholds.high {
            RiskLevel::High
        } else if score >= self.thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

fn is_test_path(path: &Path) -> bool {
    let in_test_dir = path.components().any(|component| {
        matches!(
            component.as_os_str().to_string_lossy().as_ref(),
            "test" | "tests" | "__tests__" | "spec"
        )
    });
    if in_test_dir {
        return true;
    }
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_ascii_lowercase()) else {
        return false;
    };
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
}
