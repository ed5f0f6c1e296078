/// Score-to-level cut points for risk assessment. Changing a threshold is
/// a configuration change, never a code change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RiskThresholds {
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 3,
            high: 5,
            critical: 7,
        }
    }
}

/// Engine-wide configuration, passed explicitly by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Name of the on-disk directory under the target root that holds
    /// snapshots, the lock file, and the emergency-stop marker. Always
    /// excluded from enumeration.
    pub reserved_dir: String,
    /// Directory names whose subtrees count as protected zones.
    pub protected_dirs: Vec<String>,
    /// Opt-in ASCII case-folded protected matching. Default is strict
    /// case-sensitive comparison on every platform.
    pub case_fold_protected: bool,
    pub risk: RiskThresholds,
    /// Bytes inspected when sniffing unknown extensions for binary content.
    pub sniff_bytes: usize,
    /// Line count above which the comprehensive check flags a file.
    pub max_file_lines: usize,
    /// Default snapshot retention for count-based pruning.
    pub retain_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reserved_dir: ".guardrail".to_string(),
            protected_dirs: vec![".claude".to_string()],
            case_fold_protected: false,
            risk: RiskThresholds::default(),
            sniff_bytes: 8192,
            max_file_lines: 3000,
            retain_count: 10,
        }
    }
}
