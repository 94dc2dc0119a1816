/// Constants module to avoid magic numbers in the codebase

// Network Configuration
pub const DEFAULT_ADMIN_URL: &str = "http://localhost:9180";
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:9080";
pub const ADMIN_KEY_HEADER: &str = "X-API-KEY";
pub const ADMIN_ROUTES_PATH: &str = "/apisix/admin/routes";
pub const ADMIN_CONSUMERS_PATH: &str = "/apisix/admin/consumers";
pub const DEFAULT_SHARED_NETWORK: &str = "gateway-net";

// Timeouts
pub const HTTP_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DNS_TIMEOUT_MS: u64 = 3_000;
pub const CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const COMMAND_TIMEOUT_SECS: u64 = 30;

// Retry budget for observation (fixed count, fixed delay)
pub const OBSERVER_RETRIES: u32 = 2;
pub const OBSERVER_RETRY_DELAY_MS: u64 = 500;

// Plugin names
pub const CONSUMER_AUTH_PLUGIN: &str = "key-auth";
pub const PROVIDER_AUTH_PLUGIN: &str = "ai-proxy";
pub const KEY_AUTH_DEFAULT_HEADER: &str = "apikey";
pub const AUTHORIZATION_HEADER: &str = "Authorization";

// Snapshots
pub const DEFAULT_BACKUPS_ROOT: &str = "backups";
pub const SNAPSHOT_METADATA_FILE: &str = "metadata.json";
pub const SNAPSHOT_ROUTES_FILE: &str = "routes.json";
pub const SNAPSHOT_CONSUMERS_FILE: &str = "consumers.json";
pub const SNAPSHOT_ENV_DIR: &str = "env";
pub const DEFAULT_ENV_FILES: &[&str] = &[".env"];

// Fields the admin API owns and rejects or rewrites on PUT
pub const SERVER_MANAGED_FIELDS: &[&str] = &["create_time", "update_time"];
