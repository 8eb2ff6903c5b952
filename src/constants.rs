//! # System Constants
//!
//! Operational boundaries of the analysis server: validation minimums for the
//! analysis kinds, compute-engine protocol defaults, and reconnect policy
//! defaults.

/// Server-wide identifiers
pub mod system {
    pub const SERVER_NAME: &str = "analysis-server";

    pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Prefix for environment-variable configuration overrides
    pub const ENV_PREFIX: &str = "ANALYSIS_SERVER";

    /// Prefix of worker thread names; the worker index is appended
    pub const WORKER_THREAD_PREFIX: &str = "analysis-worker";

    pub const SUPERVISOR_THREAD_NAME: &str = "listener-supervisor";
}

/// Structural limits enforced before a request reaches the compute engine
pub mod analysis {
    /// Minimum members of each group in a class comparison or F-test
    pub const MIN_GROUP_SIZE: usize = 3;

    /// Minimum members of each group in a generalized linear model
    pub const MIN_GLM_GROUP_SIZE: usize = 2;

    /// Minimum samples for clustering and principal component analysis
    pub const MIN_SAMPLES: usize = 2;

    /// Minimum principal components a PCA result must expose
    pub const MIN_PCA_COMPONENTS: usize = 3;

    /// Gene clustering is rejected above this many reporters
    pub const MAX_REPORTERS_FOR_GENE_CLUSTERING: usize = 3000;
}

/// Rendered image settings used by the plot retrieval helper
pub mod image {
    /// Dots per inch passed to the bitmap device
    pub const RESOLUTION_DPI: u32 = 72;

    /// Horizontal points reserved per dendrogram label
    pub const POINTS_PER_LABEL: f64 = 15.0;

    pub const MIN_WIDTH_INCHES: u32 = 3;

    pub const DENDROGRAM_HEIGHT_INCHES: u32 = 10;

    /// Chunk size used when streaming a rendered file out of the engine
    pub const READ_CHUNK_BYTES: usize = 65_536;
}

/// Compute-engine connection defaults
pub mod engine {
    pub const DEFAULT_HOST: &str = "localhost";

    pub const DEFAULT_PORT: u16 = 6311;

    pub const DEFAULT_USERNAME: &str = "guest";

    pub const DEFAULT_PASSWORD: &str = "guest";
}

/// Message transport defaults
pub mod transport {
    pub const DEFAULT_CONNECTION_FACTORY: &str = "ConnectionFactory";

    pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

    /// Message type stamped on outbound replies
    pub const REPLY_MESSAGE_TYPE: &str = "analysis_reply";
}

/// Reconnect supervisor defaults
pub mod reconnect {
    pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

    /// Every failed attempt up to this one is logged in full
    pub const DEFAULT_VERBOSE_ATTEMPTS: u64 = 10;

    /// After the verbose window only every Nth attempt is logged
    pub const DEFAULT_SUMMARY_INTERVAL: u64 = 600;
}
