use parking_lot::Mutex;
use std::sync::Arc;

use store_api::{StoreError, StoreOp, StorePath, StoreResult};

enum FaultBudget {
    Times(u32),
    Always,
}

struct ArmedFault {
    op: StoreOp,
    prefix: StorePath,
    budget: FaultBudget,
}

impl ArmedFault {
    fn matches(&self, op: StoreOp, path: &StorePath) -> bool {
        self.op == op && path.starts_with(&self.prefix) && !self.exhausted()
    }

    fn consume(&mut self) {
        if let FaultBudget::Times(remaining) = &mut self.budget {
            *remaining = remaining.saturating_sub(1);
        }
    }

    fn exhausted(&self) -> bool {
        matches!(self.budget, FaultBudget::Times(0))
    }
}

/// Scripted transient failures for rollback and retry tests.
///
/// An armed fault makes the matching primitive return
/// [`StoreError::Unavailable`] for any path at or below its prefix, either a
/// fixed number of times or until cleared. Unrelated paths pass through.
#[derive(Clone, Default)]
pub struct FaultPlan {
    inner: Arc<Mutex<Vec<ArmedFault>>>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_once(&self, op: StoreOp, prefix: StorePath) {
        self.fail_times(op, prefix, 1);
    }

    pub fn fail_times(&self, op: StoreOp, prefix: StorePath, times: u32) {
        self.inner.lock().push(ArmedFault {
            op,
            prefix,
            budget: FaultBudget::Times(times),
        });
    }

    pub fn fail_always(&self, op: StoreOp, prefix: StorePath) {
        self.inner.lock().push(ArmedFault {
            op,
            prefix,
            budget: FaultBudget::Always,
        });
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Faults still armed (sticky faults count until cleared).
    pub fn armed(&self) -> usize {
        self.inner.lock().iter().filter(|f| !f.exhausted()).count()
    }

    pub(crate) fn intercept(&self, op: StoreOp, path: &StorePath) -> StoreResult<()> {
        let mut faults = self.inner.lock();
        let Some(fault) = faults.iter_mut().find(|f| f.matches(op, path)) else {
            return Ok(());
        };
        fault.consume();
        let err = StoreError::unavailable(op, path);
        faults.retain(|f| !f.exhausted());
        Err(err)
    }
}
