use std::{net::SocketAddr, str::FromStr};

use anyhow::bail;
use clap::Parser;
use yaml_rust2::{Yaml, YamlLoader};

mod builder;
#[cfg(test)]
mod tests;

use builder::ProfdConfigBuilder;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/profd/config.yml";

/// Load the daemon configuration from the default configuration file,
/// overlaying CLI arguments and environment variables on top.
pub fn load() -> anyhow::Result<ProfdConfig> {
    ProfdConfigBuilder::new()
        .add_files(&[DEFAULT_CONFIG_PATH])
        .build()
}

#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct ProfdConfig {
    address: Option<SocketAddr>,
    expose_metrics: Option<bool>,
}

impl ProfdConfig {
    pub fn update(&mut self, from: &ProfdConfig) {
        if let Some(address) = from.address {
            self.address = Some(address);
        }

        if let Some(expose_metrics) = from.expose_metrics {
            self.expose_metrics = Some(expose_metrics);
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
            .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 9000)))
    }

    pub fn expose_metrics(&self) -> bool {
        self.expose_metrics.unwrap_or(false)
    }

    #[cfg(test)]
    pub fn set_expose_metrics(&mut self, expose_metrics: bool) {
        self.expose_metrics = Some(expose_metrics);
    }
}

impl TryFrom<&str> for ProfdConfig {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        YamlLoader::load_from_str(value)?.try_into()
    }
}

impl TryFrom<Vec<Yaml>> for ProfdConfig {
    type Error = anyhow::Error;

    fn try_from(value: Vec<Yaml>) -> Result<Self, Self::Error> {
        if value.is_empty() {
            // Ignore empty configuration
            return Ok(Default::default());
        }

        if value.len() > 1 {
            bail!("YAML file contains multiple documents");
        }

        let mut config = ProfdConfig::default();
        let value = &value[0];
        if value.is_null() {
            return Ok(config);
        }

        let Some(value) = value.as_hash() else {
            bail!("Wrong configuration type");
        };

        for (k, v) in value.iter() {
            let Some(k) = k.as_str() else {
                bail!("key is not string: {k:?}")
            };

            match k {
                "address" => {
                    let Some(addr) = v.as_str() else {
                        bail!("address field has incorrect type: {v:?}");
                    };
                    let address = match SocketAddr::from_str(addr) {
                        Ok(a) => a,
                        Err(e) => bail!("Failed to parse address: {e}"),
                    };
                    config.address = Some(address);
                }
                "expose_metrics" => {
                    let Some(em) = v.as_bool() else {
                        bail!("expose_metrics field has incorrect type: {v:?}");
                    };
                    config.expose_metrics = Some(em);
                }
                name => bail!("Invalid field '{name}' with value: {v:?}"),
            }
        }

        Ok(config)
    }
}

#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct ProfdCli {
    /// The address to bind for all exposed endpoints
    #[arg(long, short, env = "PROFD_ADDRESS")]
    address: Option<SocketAddr>,

    /// Whether prometheus metrics should be collected and exposed
    #[arg(
        long,
        overrides_with("no_expose_metrics"),
        env = "PROFD_EXPOSE_METRICS"
    )]
    expose_metrics: bool,
    #[arg(long, overrides_with = "expose_metrics", hide(true))]
    no_expose_metrics: bool,
}

impl ProfdCli {
    fn to_config(&self) -> ProfdConfig {
        ProfdConfig {
            address: self.address,
            expose_metrics: resolve_bool_arg(self.expose_metrics, self.no_expose_metrics),
        }
    }
}

fn resolve_bool_arg(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
        (_, _) => unreachable!("clap should make this impossible"),
    }
}
