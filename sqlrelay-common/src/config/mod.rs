use std::fs::File;
use std::io::Read;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use serde::Deserialize;
use serde::Serialize;

/// Gateway configuration, cached behind a process-wide `RwLock` and
/// swapped in as a whole on reload.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GatewayConfig {
    listen: ListenConfig,
    server_id: ServerIdConfig,
    auth: AuthConfig,
}

impl GatewayConfig {
    pub fn from_str(config_str: &str) -> Self {
        toml::from_str(config_str).unwrap()
    }

    pub fn from_file(config_file: &str) -> Self {
        let mut file = File::open(config_file).expect("Unable to open file");
        let mut config_str = String::new();
        file.read_to_string(&mut config_str).expect("Unable to read file");
        Self::from_str(&*config_str)
    }
}

impl GatewayConfig {
    pub fn get_host() -> String {
        GatewayConfig::current().listen.host.clone()
    }

    pub fn get_port() -> u32 {
        GatewayConfig::current().listen.port
    }

    pub fn get_server_version() -> String {
        GatewayConfig::current().server_id.version.clone()
    }

    pub fn get_thread_id_base() -> u32 {
        GatewayConfig::current().server_id.thread_id_base
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListenConfig {
    host: String,
    port: u32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            host: "127.0.0.1".to_string(),
            port: 8306,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerIdConfig {
    version: String,
    thread_id_base: u32,
}

impl Default for ServerIdConfig {
    fn default() -> Self {
        ServerIdConfig {
            version: "5.6.4-sqlrelay-gateway".to_string(),
            thread_id_base: 1,
        }
    }
}

/// The core never reads credentials out of config: user/ACL databases are
/// an external collaborator, referenced only through `CredentialStore`.
/// This section exists so a host can point at where that collaborator's
/// backing store lives without the core caring what it is.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AuthConfig {
    credential_source: String,
}

impl AuthConfig {
    pub fn credential_source(&self) -> &str {
        &self.credential_source
    }
}

impl GatewayConfig {
    pub fn current() -> Arc<GatewayConfig> {
        GATEWAY_CONFIG_CACHE.read().unwrap().clone()
    }

    pub fn make_current(self) {
        *GATEWAY_CONFIG_CACHE.write().unwrap() = Arc::new(self)
    }
}

lazy_static! {
    static ref GATEWAY_CONFIG_CACHE: RwLock<Arc<GatewayConfig>> = RwLock::new(Default::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let cfg = GatewayConfig::from_str(
            r#"
            [listen]
            host = "0.0.0.0"
            port = 3307

            [server_id]
            version = "5.7.0-test"
            thread_id_base = 42

            [auth]
            credential_source = "etc/users.yaml"
            "#,
        );
        assert_eq!(cfg.listen.host, "0.0.0.0");
        assert_eq!(cfg.listen.port, 3307);
        assert_eq!(cfg.server_id.thread_id_base, 42);
        assert_eq!(cfg.auth.credential_source(), "etc/users.yaml");
    }

    #[test]
    fn current_defaults_until_made_current() {
        let cfg = GatewayConfig::current();
        assert_eq!(cfg.listen.host, "127.0.0.1");
    }
}
