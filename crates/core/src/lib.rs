pub mod auth;
pub mod config;
pub mod fate;
pub mod metrics;
pub mod testing;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthConfig, AuthMethod, Config,
    ConfigError, DatabaseConfig, FateConfig, SanitizedConfig, ServerConfig,
};
pub use fate::{
    BatchGenerator, BatchQueueEntry, DeletionReport, FateBatch, FateError, FateStore, FateTicket,
    GenerateBatchRequest, GenerationError, GenerationPhase, GenerationReport, ListTicketsQuery,
    ServiceError, ShopWeight, SqliteFateStore, TicketPage,
};
