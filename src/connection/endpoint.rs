//! Gateway endpoint resolution

use super::ConnectionConfig;

/// Production gateway hostname
pub const PRODUCTION_GATEWAY: &str = "gateway.push.apple.com";

/// Sandbox gateway hostname
pub const SANDBOX_GATEWAY: &str = "gateway.sandbox.push.apple.com";

/// Gateway port
pub const GATEWAY_PORT: u16 = 2195;

/// Environment variable consulted when the config does not pick a gateway
pub const ENVIRONMENT_VAR: &str = "APN_ENV";

/// Value of [`ENVIRONMENT_VAR`] that selects the production gateway
pub const PRODUCTION_MARKER: &str = "production";

/// Pick the gateway address.
///
/// Precedence, highest first: explicit `address`, explicit `production`,
/// `environment == "production"`, then the sandbox.
pub fn resolve_address(config: &ConnectionConfig, environment: Option<&str>) -> String {
    if let Some(address) = &config.address {
        return address.clone();
    }

    let production = config
        .production
        .unwrap_or(environment == Some(PRODUCTION_MARKER));

    if production {
        PRODUCTION_GATEWAY.to_string()
    } else {
        SANDBOX_GATEWAY.to_string()
    }
}

/// Snapshot the environment indicator
pub fn read_environment() -> Option<String> {
    std::env::var(ENVIRONMENT_VAR).ok()
}
