use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::contract::{Contract, ContractDefinition, ContractType};
use crate::error::ContractError;
use crate::wire::frame::MAX_ENCODABLE_PAYLOAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen_address: IpAddr,
    pub port: u16,
    pub transport: TransportKind,
    /// Records not seen for this long are hidden from queries.
    pub server_timeout_ms: u64,
    /// Zero disables the background sweep.
    pub sweep_interval_ms: u64,
    pub max_frame_size: usize,
    pub udp_session_idle_ms: u64,
    pub verbose: bool,
    pub contract: Vec<ContractDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9423,
            transport: TransportKind::Tcp,
            server_timeout_ms: 20_000,
            sweep_interval_ms: 60_000,
            max_frame_size: 8192,
            udp_session_idle_ms: 60_000,
            verbose: false,
            contract: vec![
                ContractDefinition::new("Name", ContractType::String, false),
                ContractDefinition::new("Players", ContractType::Int32, true),
            ],
        }
    }
}

impl Config {
    /// Defaults, then `serverlist.toml`, then `serverlist.json`, then
    /// `SERVERLIST_*` environment variables.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("serverlist.toml"))
            .merge(Json::file("serverlist.json"))
            .merge(Env::prefixed("SERVERLIST_"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_frame_size == 0 || self.max_frame_size > MAX_ENCODABLE_PAYLOAD {
            anyhow::bail!(
                "max_frame_size must be between 1 and {}, got {}",
                MAX_ENCODABLE_PAYLOAD,
                self.max_frame_size
            );
        }
        if self.server_timeout_ms == 0 {
            anyhow::bail!("server_timeout_ms must be positive");
        }
        if self.udp_session_idle_ms == 0 {
            anyhow::bail!("udp_session_idle_ms must be positive");
        }
        self.contract()
            .map_err(|e| anyhow::anyhow!("Invalid contract: {}", e))?;
        Ok(())
    }

    pub fn contract(&self) -> Result<Contract, ContractError> {
        Contract::new(self.contract.clone())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.port)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    pub fn udp_session_idle(&self) -> Duration {
        Duration::from_millis(self.udp_session_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_files() {
        Jail::expect_with(|_| {
            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.bind_addr(), "0.0.0.0:9423".parse().unwrap());
            assert_eq!(config.transport, TransportKind::Tcp);
            assert_eq!(config.server_timeout(), Duration::from_secs(20));
            assert_eq!(config.sweep_interval(), Some(Duration::from_secs(60)));

            let contract = config.contract().unwrap();
            assert!(contract.get("Players").unwrap().required);
            assert!(!contract.get("Name").unwrap().required);
            Ok(())
        });
    }

    #[test]
    fn files_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "serverlist.toml",
                r#"
                    port = 7000
                    transport = "udp"
                    sweep_interval_ms = 0

                    [[contract]]
                    name = "Map"
                    type = "String"

                    [[contract]]
                    name = "Slots"
                    type = "UInt16"
                    required = true
                "#,
            )?;
            jail.create_file("serverlist.json", r#"{ "port": 7001, "verbose": true }"#)?;
            jail.set_env("SERVERLIST_PORT", "7002");
            jail.set_env("SERVERLIST_LISTEN_ADDRESS", "127.0.0.1");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.bind_addr(), "127.0.0.1:7002".parse().unwrap());
            assert_eq!(config.transport, TransportKind::Udp);
            assert!(config.verbose);
            assert_eq!(config.sweep_interval(), None);

            let contract = config.contract().unwrap();
            assert_eq!(contract.definitions().len(), 2);
            assert_eq!(contract.get("Slots").unwrap().field_type, ContractType::UInt16);
            assert!(contract.get("Players").is_none());
            Ok(())
        });
    }

    #[test]
    fn rejects_bad_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "serverlist.toml",
                r#"
                    [[contract]]
                    name = "Players"
                    type = "Int32"

                    [[contract]]
                    name = "Players"
                    type = "String"
                "#,
            )?;
            assert!(Config::load().is_err());

            jail.create_file("serverlist.toml", "max_frame_size = 70000")?;
            assert!(Config::load().is_err());

            jail.create_file("serverlist.toml", r#"transport = "quic""#)?;
            assert!(Config::load().is_err());
            Ok(())
        });
    }
}
