use crate::config::EngineConfig;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Coarse content bucket used for reporting and risk factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Documentation,
    Configuration,
    SourceCode,
    Other,
}

/// Stateless path classification: protected zones, text/source detection,
/// content-type buckets. Matching is case-sensitive unless the config
/// opts into ASCII case folding.
#[derive(Clone, Debug)]
pub struct PathClassifier {
    protected_dirs: Vec<String>,
    case_fold: bool,
    sniff_bytes: usize,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "c", "h", "cpp", "hpp", "rb", "sh",
    "bash", "php", "swift", "kt", "scala", "sql",
];

const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "ini", "conf", "env", "cfg"];

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];

impl PathClassifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            protected_dirs: config.protected_dirs.clone(),
            case_fold: config.case_fold_protected,
            sniff_bytes: config.sniff_bytes,
        }
    }

    /// Whether any segment of the path names a protected directory.
    pub fn is_protected(&self, path: &Path) -> bool {
        path.components().any(|component| {
            let segment = component.as_os_str().to_string_lossy();
            self.protected_dirs.iter().any(|protected| {
                if self.case_fold {
                    segment.eq_ignore_ascii_case(protected)
                } else {
                    segment == protected.as_str()
                }
            })
        })
    }

    /// Whether the file is worth snapshotting: a recognized text/source
    /// extension, or an unknown extension whose leading bytes carry no NUL.
    pub fn is_source_or_text(&self, path: &Path) -> bool {
        match extension_of(path) {
            Some(ext)
                if SOURCE_EXTENSIONS.contains(&ext.as_str())
                    || CONFIG_EXTENSIONS.contains(&ext.as_str())
                    || DOC_EXTENSIONS.contains(&ext.as_str())
                    || matches!(ext.as_str(), "html" | "css" | "xml" | "svg" | "csv") =>
            {
                true
            }
            _ => self.sniff_is_text(path),
        }
    }

    pub fn classify_content_type(&self, path: &Path) -> ContentType {
        match extension_of(path) {
            Some(ext) if DOC_EXTENSIONS.contains(&ext.as_str()) => ContentType::Documentation,
            Some(ext) if CONFIG_EXTENSIONS.contains(&ext.as_str()) => ContentType::Configuration,
            Some(ext) if SOURCE_EXTENSIONS.contains(&ext.as_str()) => ContentType::SourceCode,
            _ => ContentType::Other,
        }
    }

    fn sniff_is_text(&self, path: &Path) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut buffer = vec![0u8; self.sniff_bytes];
        let Ok(read) = file.read(&mut buffer) else {
            return false;
        };
        read > 0 && !buffer[..read].contains(&0)
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn classifier() -> PathClassifier {
        PathClassifier::new(&EngineConfig::default())
    }

    #[test]
    fn is_protected_claude_segment_expected_true() {
        let classifier = classifier();
        assert!(classifier.is_protected(Path::new(".claude/commands/cleanup.md")));
        assert!(classifier.is_protected(Path::new("nested/.claude/agents/a.md")));
        assert!(!classifier.is_protected(Path::new("src/claude.rs")));
        assert!(!classifier.is_protected(Path::new("docs/claude/notes.md")));
    }

    #[test]
    fn is_protected_case_mismatch_expected_false_without_fold() {
        let classifier = classifier();
        assert!(!classifier.is_protected(Path::new(".Claude/commands/a.md")));

        let config = EngineConfig {
            case_fold_protected: true,
            ..EngineConfig::default()
        };
        let folding = PathClassifier::new(&config);
        assert!(folding.is_protected(Path::new(".Claude/commands/a.md")));
    }

    #[test]
    fn is_source_or_text_known_extensions_expected_true_without_reading() {
        let classifier = classifier();
        // Paths do not exist; the extension table must decide on its own.
        assert!(classifier.is_source_or_text(Path::new("missing/main.rs")));
        assert!(classifier.is_source_or_text(Path::new("missing/setup.yaml")));
        assert!(classifier.is_source_or_text(Path::new("missing/README.md")));
    }

    #[test]
    fn is_source_or_text_unknown_extension_expected_nul_sniff() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let text = tmp.path().join("notes.unknownext");
        fs::write(&text, "plain words\n").expect("text file should write");
        let binary = tmp.path().join("blob.unknownext");
        fs::write(&binary, [0x7fu8, b'E', b'L', b'F', 0x00, 0x01]).expect("binary should write");

        let classifier = classifier();
        assert!(classifier.is_source_or_text(&text));
        assert!(!classifier.is_source_or_text(&binary));
    }

    #[test]
    fn classify_content_type_expected_bucket_per_extension() {
        let classifier = classifier();
        assert_eq!(
            classifier.classify_content_type(Path::new("a/readme.md")),
            ContentType::Documentation
        );
        assert_eq!(
            classifier.classify_content_type(Path::new("a/settings.toml")),
            ContentType::Configuration
        );
        assert_eq!(
            classifier.classify_content_type(Path::new("a/lib.rs")),
            ContentType::SourceCode
        );
        assert_eq!(
            classifier.classify_content_type(Path::new("a/photo.png")),
            ContentType::Other
        );
    }
}
