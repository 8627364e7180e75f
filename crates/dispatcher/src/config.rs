use trainq_core::CoreError;

/// Default coordination service location.
pub const DEFAULT_DATASTORE_URL: &str = "http://localhost:3030";

/// Default base name from which service names are derived.
pub const DEFAULT_MAIN_SERVICE: &str = "training_server";

/// Default number of worker processes.
pub const DEFAULT_POOL_SIZE: usize = 2;

/// Dispatcher configuration.
///
/// All fields have defaults suitable for a local coordination service.
/// Service names are derived from `main_service` unless overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Coordination service location (default: `http://localhost:3030`).
    pub datastore_url: String,
    /// Explicit event-feed URL; derived from `datastore_url` when `None`.
    pub feed_url: Option<String>,
    /// Base service name (default: `training_server`).
    pub main_service: String,
    /// Override for the worker service name.
    pub worker_service: Option<String>,
    /// Override for the training (job) service name.
    pub training_service: Option<String>,
    /// Number of worker processes (default: `2`, at least `1`).
    pub pool_size: usize,
    /// Fixed dispatcher identity; generated when `None`.
    pub worker_id: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            datastore_url: DEFAULT_DATASTORE_URL.to_string(),
            feed_url: None,
            main_service: DEFAULT_MAIN_SERVICE.to_string(),
            worker_service: None,
            training_service: None,
            pool_size: DEFAULT_POOL_SIZE,
            worker_id: None,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                   |
    /// |---------------------------|---------------------------|
    /// | `TRAINQ_DATASTORE_URL`    | `http://localhost:3030`   |
    /// | `TRAINQ_FEED_URL`         | derived from the location |
    /// | `TRAINQ_MAIN_SERVICE`     | `training_server`         |
    /// | `TRAINQ_WORKER_SERVICE`   | `{main}_worker_service`   |
    /// | `TRAINQ_TRAINING_SERVICE` | `{main}_training_service` |
    /// | `TRAINQ_POOL_SIZE`        | `2`                       |
    /// | `TRAINQ_WORKER_ID`        | generated                 |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let pool_size = match var("TRAINQ_POOL_SIZE") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                CoreError::Validation(format!("TRAINQ_POOL_SIZE must be a positive integer, got \"{raw}\""))
            })?,
            None => defaults.pool_size,
        };

        let config = Self {
            datastore_url: var("TRAINQ_DATASTORE_URL").unwrap_or(defaults.datastore_url),
            feed_url: var("TRAINQ_FEED_URL"),
            main_service: var("TRAINQ_MAIN_SERVICE").unwrap_or(defaults.main_service),
            worker_service: var("TRAINQ_WORKER_SERVICE"),
            training_service: var("TRAINQ_TRAINING_SERVICE"),
            pool_size,
            worker_id: var("TRAINQ_WORKER_ID"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pool_size == 0 {
            return Err(CoreError::Validation(
                "Pool size must be at least 1".to_string(),
            ));
        }
        if self.main_service.trim().is_empty()
            && (self.worker_service.is_none() || self.training_service.is_none())
        {
            return Err(CoreError::Validation(
                "Main service name must not be empty when service names are derived".to_string(),
            ));
        }
        Ok(())
    }

    /// Name of the service holding job records.
    pub fn training_service_name(&self) -> String {
        self.training_service
            .clone()
            .unwrap_or_else(|| format!("{}_training_service", self.main_service))
    }

    /// Name of the service holding worker records.
    pub fn worker_service_name(&self) -> String {
        self.worker_service
            .clone()
            .unwrap_or_else(|| format!("{}_worker_service", self.main_service))
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_main_service(mut self, main_service: impl Into<String>) -> Self {
        self.main_service = main_service.into();
        self
    }
}
