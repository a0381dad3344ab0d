//! Process-wide engine session and warm-up.
//!
//! The `DataFusion` session is created lazily on first use and shared by every
//! query afterwards. Its settings are fixed at creation: options passed to
//! later calls of [`shared_engine`] are ignored.

use std::sync::{Arc, LazyLock};

use log::debug;
use tokio::sync::OnceCell;

use crate::config::EngineOptions;
use crate::engine::DataFusionEngine;
use crate::error::QueryExecutionError;
use crate::warmup::WarmUp;

static SHARED_ENGINE: OnceCell<Arc<DataFusionEngine>> = OnceCell::const_new();
static SHARED_WARM_UP: LazyLock<WarmUp> = LazyLock::new(WarmUp::new);

/// The process-wide engine, created from `options` on the first call.
///
/// Safe to call concurrently; exactly one caller initializes the session and
/// the others wait for it. A failed initialization is retried by the next
/// call.
///
/// # Errors
///
/// Returns [`QueryExecutionError::Session`] if the session cannot be created.
pub async fn shared_engine(
    options: &EngineOptions,
) -> Result<Arc<DataFusionEngine>, QueryExecutionError> {
    SHARED_ENGINE
        .get_or_try_init(|| async {
            debug!("Initialising shared query engine");
            DataFusionEngine::try_new(options.clone()).map(Arc::new)
        })
        .await
        .map(Arc::clone)
        .map_err(|e| QueryExecutionError::Session {
            message: e.to_string(),
        })
}

/// The process-wide warm-up task.
#[must_use]
pub fn shared_warm_up() -> &'static WarmUp {
    &SHARED_WARM_UP
}
