//! System context: the process-wide wiring handed to every component.
//!
//! Constructed once at boot and shared via `Arc`; nothing here mutates
//! after construction.

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::CacheService;
use crate::config::ConductorConfig;
use crate::database::SqlFunctionExecutor;
use crate::errors::ConductorResult;
use crate::events::EventPublisher;

#[derive(Debug)]
pub struct SystemContext {
    pool: PgPool,
    config: Arc<ConductorConfig>,
    event_publisher: Arc<EventPublisher>,
    cache: Arc<CacheService>,
    /// Identifies this orchestrator process in logs and transition metadata
    processor_id: Uuid,
}

impl SystemContext {
    pub fn new(pool: PgPool, config: ConductorConfig) -> Self {
        let header = config.telemetry.correlation_id_header.clone();
        let event_publisher = Arc::new(if config.telemetry.enabled {
            EventPublisher::with_default_subscribers(header)
        } else {
            EventPublisher::new(header)
        });
        let cache = Arc::new(CacheService::in_memory(config.cache.clone()));
        Self {
            pool,
            config: Arc::new(config),
            event_publisher,
            cache,
            processor_id: Uuid::new_v4(),
        }
    }

    /// Context with configuration loaded from the environment
    pub async fn with_pool(pool: PgPool) -> ConductorResult<Self> {
        let config = ConductorConfig::load()?;
        Ok(Self::new(pool, config))
    }

    pub fn database_pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn event_publisher(&self) -> &Arc<EventPublisher> {
        &self.event_publisher
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    pub fn processor_id(&self) -> Uuid {
        self.processor_id
    }

    pub fn sql_executor(&self) -> SqlFunctionExecutor {
        SqlFunctionExecutor::new(self.pool.clone())
    }
}
