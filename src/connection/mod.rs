pub mod config;

use crate::core::Result;
use crate::interface::EngineFactory;
use config::{GroupConfig, redacted_dsn};
use tracing::{Level, event};

/// Connected engines of one configured group, in configuration order.
pub struct ConnectedGroup<E> {
    pub masters: Vec<E>,
    pub slaves: Vec<E>,
}

/// Connects every DSN of `group` through `factory`.
///
/// Stops at the first DSN that fails; engines connected before it are
/// dropped.
pub async fn connect_group<F: EngineFactory>(
    factory: &F,
    group: &GroupConfig,
) -> Result<ConnectedGroup<F::Engine>> {
    let mut masters = Vec::with_capacity(group.masters.len());
    for dsn in &group.masters {
        masters.push(connect(factory, &group.identifier, dsn).await?);
    }

    let mut slaves = Vec::with_capacity(group.slaves.len());
    for dsn in &group.slaves {
        slaves.push(connect(factory, &group.identifier, dsn).await?);
    }

    Ok(ConnectedGroup { masters, slaves })
}

async fn connect<F: EngineFactory>(factory: &F, identifier: &str, dsn: &str) -> Result<F::Engine> {
    match factory.connect(dsn).await {
        Ok(engine) => {
            event!(Level::DEBUG, identifier, dsn = %redacted_dsn(dsn), "engine connected");
            Ok(engine)
        }
        Err(err) => {
            event!(
                Level::ERROR,
                identifier,
                dsn = %redacted_dsn(dsn),
                error = %err,
                "engine connection failed"
            );
            Err(err)
        }
    }
}
