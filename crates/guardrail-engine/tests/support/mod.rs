use async_trait::async_trait;
use guardrail_engine::{OperationKind, OperationRunner};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub type Mutation = Arc<dyn Fn(&Path) + Send + Sync>;

/// Operation runner double: applies an optional mutation to the target
/// root, records the invocation, and reports a scripted result.
pub struct ScriptedRunner {
    target_root: PathBuf,
    succeed: bool,
    mutation: Option<Mutation>,
    invocations: Mutex<Vec<OperationKind>>,
}

impl ScriptedRunner {
    pub fn succeeding(target_root: &Path) -> Self {
        Self {
            target_root: target_root.to_path_buf(),
            succeed: true,
            mutation: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(target_root: &Path) -> Self {
        Self {
            succeed: false,
            ..Self::succeeding(target_root)
        }
    }

    pub fn with_mutation<F>(mut self, mutation: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        self.mutation = Some(Arc::new(mutation));
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations
            .lock()
            .expect("invocations mutex should lock")
            .len()
    }
}

#[async_trait]
impl OperationRunner for ScriptedRunner {
    async fn perform(&self, kind: OperationKind, _paths: &[PathBuf]) -> bool {
        if let Some(mutation) = &self.mutation {
            mutation(&self.target_root);
        }
        self.invocations
            .lock()
            .expect("invocations mutex should lock")
            .push(kind);
        self.succeed
    }
}
