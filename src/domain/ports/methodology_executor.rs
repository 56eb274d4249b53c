//! Methodology executor port.

use async_trait::async_trait;

use crate::domain::errors::EngineResult;
use crate::domain::models::{Methodology, MethodologyReport, PassContext, SubjectSnapshot};

/// Runs one methodology's check logic against a read-only subject snapshot.
///
/// Implementations must be stateless across invocations: a call may depend
/// only on its arguments. Many calls run concurrently inside a wave.
///
/// Return [`EngineError::ExecutorTransient`](crate::domain::errors::EngineError::ExecutorTransient)
/// for failures worth retrying; any other error is treated as permanent.
#[async_trait]
pub trait MethodologyExecutor: Send + Sync {
    async fn execute(
        &self,
        subject: &SubjectSnapshot,
        methodology: &Methodology,
        context: &PassContext,
    ) -> EngineResult<MethodologyReport>;
}
