//! Gateway daemon: CLI parsing, config load, and the server accept loop.

#![warn(rust_2018_idioms)]

use std::sync::Arc;

use clap::{App, Arg};
use log::info;

use sqlrelay_common::config::GatewayConfig;
use sqlrelay_common::service::Service;

use sqlrelay::credentials::StaticCredentialStore;
use sqlrelay::server::GatewayService;

/// The only module this gateway ships: native-password auth, registered at
/// startup through the module interface instead of the engine calling the
/// auth algebra directly. Demonstrates the load-once contract without any
/// actual `dlopen`ing, which stays out of scope.
struct NativePasswordObject;
impl sqlrelay_modules::ModuleObject for NativePasswordObject {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct NativePasswordModule;
impl sqlrelay_modules::Module for NativePasswordModule {
    fn version(&self) -> &str {
        sqlrelay_protocol::constant::AUTH_PLUGIN_NATIVE_PASSWORD
    }

    fn get_module_object(&self) -> Arc<dyn sqlrelay_modules::ModuleObject> {
        Arc::new(NativePasswordObject)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sqlrelay_common::logging::init();

    sqlrelay_modules::registry().load_module("native_password", &NativePasswordModule);

    let matches = App::new("sqlrelay")
        .version("0.1.0")
        .about("Transparent MySQL wire-protocol gateway")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("Path to the gateway TOML config file"),
        )
        .arg(
            Arg::with_name("users")
                .long("users")
                .takes_value(true)
                .help("Path to a TOML file of demo users ([users] table of name = password)"),
        )
        .arg(
            Arg::with_name("backend")
                .long("backend")
                .takes_value(true)
                .default_value("default")
                .help("Name of the single backend every non-local statement is routed to"),
        )
        .get_matches();

    if let Some(config_path) = matches.value_of("config") {
        GatewayConfig::from_file(config_path).make_current();
        info!("loaded config from {}", config_path);
    }

    let credentials: Arc<dyn sqlrelay_protocol::CredentialStore> = match matches.value_of("users") {
        Some(path) => Arc::new(StaticCredentialStore::from_file(path)?),
        None => Arc::new(StaticCredentialStore::new().with_user("root", b"")),
    };

    let routing: Arc<dyn sqlrelay_control_panel::RoutingPolicy> =
        Arc::new(sqlrelay_control_panel::SingleBackendPolicy::new(
            matches.value_of("backend").unwrap_or("default"),
        ));

    let host = GatewayConfig::get_host();
    let port = GatewayConfig::get_port();

    GatewayService::new(host, port, credentials, routing).serve().await?;

    Ok(())
}
