use crate::classify::PathClassifier;
use crate::config::EngineConfig;
use crate::snapshot::walk_source_files;
use crate::types::{IntegrityReport, SnapshotMetadata, VerificationLevel};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::{fs, io::Read};

/// Language-aware validity check, supplied by the caller. The verifier
/// treats it as a black box returning pass/fail.
#[async_trait]
pub trait SyntaxChecker: Send + Sync {
    async fn check(&self, path: &Path) -> bool;
}

/// Accepts every file. Default when the caller has no language tooling.
#[derive(Debug, Default)]
pub struct NoopSyntaxChecker;

#[async_trait]
impl SyntaxChecker for NoopSyntaxChecker {
    async fn check(&self, _path: &Path) -> bool {
        true
    }
}

/// Post-operation validation of a target root against a snapshot baseline.
/// Findings are data, never errors: the caller interprets the report.
pub struct IntegrityVerifier {
    reserved_dir: String,
    classifier: PathClassifier,
    max_file_lines: usize,
}

impl IntegrityVerifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            reserved_dir: config.reserved_dir.clone(),
            classifier: PathClassifier::new(config),
            max_file_lines: config.max_file_lines,
        }
    }

    /// `baseline` is `None` only when the caller opted out of the snapshot;
    /// existence checks are then skipped and the report says so.
    pub async fn verify(
        &self,
        target_root: &Path,
        baseline: Option<&SnapshotMetadata>,
        level: VerificationLevel,
        checker: &dyn SyntaxChecker,
    ) -> IntegrityReport {
        let mut report = IntegrityReport::default();

        match baseline {
            Some(baseline) => {
                for relative in baseline.files.keys() {
                    let path = target_root.join(relative);
                    if !is_readable_file(&path) {
                        report
                            .errors
                            .push(format!("baseline file missing or unreadable: {relative}"));
                    }
                }
            }
            None => {
                report
                    .warnings
                    .push("no baseline snapshot; existence checks skipped".to_string());
            }
        }

        if level == VerificationLevel::Basic {
            return report;
        }

        let current = walk_source_files(target_root, &self.reserved_dir, &self.classifier);
        for (absolute, relative) in &current {
            if !checker.check(absolute).await {
                report.errors.push(format!("syntax check failed: {relative}"));
                continue;
            }

            let Ok(bytes) = fs::read(absolute) else {
                report.errors.push(format!("unreadable file: {relative}"));
                continue;
            };

            let Ok(text) = std::str::from_utf8(&bytes) else {
                report.warnings.push(format!("not valid UTF-8: {relative}"));
                continue;
            };
            if has_mixed_line_endings(text) {
                report
                    .warnings
                    .push(format!("mixed line endings: {relative}"));
            }

            if level == VerificationLevel::Comprehensive {
                self.comprehensive_checks(absolute, relative, text, &mut report);
            }
        }

        report
    }

    fn comprehensive_checks(
        &self,
        absolute: &Path,
        relative: &str,
        text: &str,
        report: &mut IntegrityReport,
    ) {
        let line_count = text.lines().count();
        if line_count > self.max_file_lines {
            report.warnings.push(format!(
                "file exceeds {} lines ({line_count}): {relative}",
                self.max_file_lines
            ));
        }

        let Some(parent) = absolute.parent() else {
            return;
        };
        for reference in relative_references(text) {
            if !reference_resolves(parent, &reference) {
                report.warnings.push(format!(
                    "unresolved reference '{reference}' in {relative}"
                ));
            }
        }
    }
}

fn is_readable_file(path: &Path) -> bool {
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut probe = [0u8; 1];
    file.read(&mut probe).is_ok()
}

fn has_mixed_line_endings(text: &str) -> bool {
    let crlf = text.matches("\r\n").count();
    let lf = text.matches('\n').count();
    crlf > 0 && lf > crlf
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?m)(?:\bfrom\s+['"](\.[^'"]+)['"]|\brequire\(\s*['"](\.[^'"]+)['"]\s*\)|^\s*#include\s+"([^"]+)")"#,
        )
        .expect("import pattern should compile")
    })
}

/// Best-effort scan for relative import/include targets.
fn relative_references(text: &str) -> Vec<String> {
    import_pattern()
        .captures_iter(text)
        .filter_map(|captures| {
            captures
                .get(1)
                .or_else(|| captures.get(2))
                .or_else(|| captures.get(3))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

fn reference_resolves(base_dir: &Path, reference: &str) -> bool {
    let target = base_dir.join(reference);
    if target.exists() {
        return true;
    }
    const CANDIDATE_EXTENSIONS: &[&str] = &["js", "ts", "jsx", "tsx", "mjs", "json"];
    CANDIDATE_EXTENSIONS.iter().any(|ext| {
        target.with_extension(ext).exists() || target.join(format!("index.{ext}")).exists()
    })
}
