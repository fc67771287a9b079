//! Command line flags, merged over the YAML configuration.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use minion_api::{BrokerType, Listener, MinionConfig};

/// OpenNMS minion
#[derive(Parser, Debug, Default)]
#[command(name = "minion")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// YAML configuration file; flags override its values
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Minion identity
    #[arg(long)]
    pub id: Option<String>,

    /// Location tag
    #[arg(long)]
    pub location: Option<String>,

    /// Transport to the controller (grpc or kafka)
    #[arg(long)]
    pub broker_type: Option<BrokerType>,

    /// Transport endpoint
    #[arg(long)]
    pub broker_url: Option<String>,

    /// SNMP trap UDP port, 0 disables
    #[arg(long)]
    pub trap_port: Option<u16>,

    /// Syslog UDP and TCP port, 0 disables
    #[arg(long)]
    pub syslog_port: Option<u16>,

    /// Prometheus metrics port, 0 disables
    #[arg(long)]
    pub stats_port: Option<u16>,

    /// Telemetry listener, repeatable
    #[arg(long = "listener", value_name = "NAME,PORT,PARSER")]
    pub listeners: Vec<Listener>,

    /// Log level (debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,
}

impl Args {
    /// Loads the configuration file, if any, applies the flags and validates.
    pub fn load_config(&self) -> anyhow::Result<MinionConfig> {
        let mut config = match &self.config {
            Some(path) => MinionConfig::load(path)
                .with_context(|| format!("cannot load {}", path.display()))?,
            None => MinionConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Overrides `config` with every flag that was given. A listener flag
    /// replaces the file's listener of the same name.
    pub fn apply(&self, config: &mut MinionConfig) {
        if let Some(id) = &self.id {
            config.id = id.clone();
        }
        if let Some(location) = &self.location {
            config.location = location.clone();
        }
        if let Some(broker_type) = self.broker_type {
            config.broker_type = broker_type;
        }
        if let Some(url) = &self.broker_url {
            config.broker_url = url.clone();
        }
        if let Some(port) = self.trap_port {
            config.trap_port = port;
        }
        if let Some(port) = self.syslog_port {
            config.syslog_port = port;
        }
        if let Some(port) = self.stats_port {
            config.stats_port = port;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        for listener in &self.listeners {
            match config.listeners.iter_mut().find(|l| l.name == listener.name) {
                Some(existing) => {
                    existing.port = listener.port;
                    existing.parser = listener.parser;
                }
                None => config.listeners.push(listener.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minion_api::ParserKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "minion",
            "--id",
            "m-9",
            "--broker-type",
            "kafka",
            "--trap-port",
            "0",
            "--listener",
            "nf,4729,Netflow9UDP",
            "--listener",
            "sf,6343,SFlowUDP",
        ]);
        assert_eq!(args.id.as_deref(), Some("m-9"));
        assert_eq!(args.broker_type, Some(BrokerType::Kafka));
        assert_eq!(args.trap_port, Some(0));
        assert_eq!(args.listeners.len(), 2);
        assert_eq!(args.listeners[1].parser, ParserKind::SflowUdp);
    }

    #[test]
    fn test_bad_listener_rejected() {
        assert!(Args::try_parse_from(["minion", "--listener", "nf,4729"]).is_err());
        assert!(Args::try_parse_from(["minion", "--broker-type", "amqp"]).is_err());
    }

    #[test]
    fn test_defaults_without_flags() {
        let config = Args::parse_from(["minion"]).load_config().unwrap();
        assert_eq!(config, MinionConfig::default());
    }
}
