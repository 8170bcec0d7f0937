pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod gateway;
pub mod manager;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod rate_limiter;
pub mod remote;
pub mod source;
pub mod store;
pub mod testing;
pub mod worker;

pub use auth::{
    create_authenticator, AuthError, AuthRequest, Authenticator, Identity, NoneAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use dispatcher::{
    new_edit_group_id, DispatchError, DispatchTask, InMemoryTaskQueue, Lane, TaskDispatcher,
    TaskQueue,
};
pub use events::{StatusUpdate, UpdateCallback};
pub use gateway::{
    ClientMessage, ConnectionPhase, GatewayConfig, GatewayContext, GatewayError, GatewaySession,
    ServerMessage, UpdateHub,
};
pub use manager::{CancelOutcome, ManagerError, RetryCancelManager, RetryOutcome};
pub use pipeline::{PipelineConfig, PipelineError, UploadPipeline};
pub use rate_limiter::{
    InMemorySlotStore, RateLimitConfig, RateLimiter, SlotBackend, SlotStore, SqliteSlotStore,
};
pub use remote::{MediaWikiClient, PublishClient, RemoteConfig, RemoteError};
pub use source::{MediaItem, SourceError, SourceHandler, SourceKind, SourceRegistry};
pub use store::{
    Batch, BatchFilter, BatchStats, BatchSummary, CredentialCipher, Preset, PresetDraft,
    SqliteUploadStore, StoreError, UploadRequest, UploadStatus, UploadStore,
};
pub use worker::{RecoveryReport, UploadWorkers, WorkerConfig, WorkerStatus};
