//! Steady-state operation, once the cold scan caught up with the chain.

use std::{future::Future, sync::Arc};

use tracing::{error, info};

use crate::{
    chain::ChainClient,
    error::KeeperError,
    executor::{Executor, ExecutorConfig},
    listener,
    state::SharedState,
    store::StateStore,
};

/// Runs the live listener and the executor side by side until the listener
/// ends or `shutdown` resolves.
///
/// The state is persisted one last time on the way out, a failure to do so
/// is only logged. Returns the listener failure, if any.
pub async fn run<C, S>(
    client: Arc<C>,
    state: SharedState<S>,
    confirmations: u64,
    config: ExecutorConfig,
    shutdown: impl Future,
) -> Result<(), KeeperError>
where
    C: ChainClient,
    S: StateStore,
{
    let mut listener = listener::start(client.clone(), state.clone(), confirmations).await?;
    let executor = Executor::new(client, state.clone(), config);

    let result = tokio::select! {
        res = &mut listener => match res {
            Ok(res) => res,
            Err(err) => Err(KeeperError::Fatal(format!("listener task failed: {err}"))),
        },
        _ = executor.run() => Ok(()),
        _ = shutdown => {
            info!("Shutdown requested");
            Ok(())
        }
    };
    listener.abort();

    if let Err(err) = state.persist().await {
        error!(%err, "Failed to persist state on shutdown");
    }
    result
}
