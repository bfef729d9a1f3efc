//! Wiring from a validated [`Config`] to a running relay.

use std::sync::Arc;

use relaybird_misskey::{MisskeyConfig, MisskeyPublisher};
use relaybird_protocol::{PublishError, Publisher};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConfigError, RouteConfig};
use crate::conversation::ConversationResolver;
use crate::mapping::{Destination, MappingError, RoutingEntry, RoutingTable};
use crate::router::EventRouter;
use crate::stream::{StopHandle, StreamConnector, StreamError};
use crate::twitter::{ClientError, TwitterClient};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build twitter client: {0}")]
    Twitter(#[from] ClientError),

    #[error("failed to build destination {name}: {source}")]
    Destination {
        name: String,
        #[source]
        source: PublishError,
    },

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Result of probing one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub source_account_id: String,
    pub destination: String,
    pub enabled: bool,
    pub healthy: bool,
}

/// A fully wired relay: one connector feeding one router.
pub struct Relay {
    connector: StreamConnector<TwitterClient>,
    router: EventRouter,
}

impl Relay {
    /// Validate `config` and build every component. Makes no network calls.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        config.validate()?;

        let bearer_token = config.twitter.bearer_token.clone().unwrap_or_default();
        let client = TwitterClient::new(
            &config.twitter.api_url,
            bearer_token,
            config.twitter.request_timeout(),
        )?;

        let entries = config
            .routes
            .iter()
            .map(routing_entry)
            .collect::<Result<Vec<_>, _>>()?;
        let table = RoutingTable::new(entries)?;
        info!(
            routes = table.len(),
            enabled = table.enabled_count(),
            "Routing table loaded"
        );

        let resolver = ConversationResolver::new(Arc::new(client.clone()));
        let router = EventRouter::new(table, resolver, config.twitter.profile_url.clone());
        let connector = StreamConnector::new(
            client,
            config.stream.retry_policy(),
            config.stream.stall_timeout(),
        );

        Ok(Self { connector, router })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.connector.stop_handle()
    }

    /// Probe every destination, enabled or not, in no particular order.
    pub async fn health_check(&self) -> Vec<HealthReport> {
        let mut reports = Vec::new();
        for entry in self.router.table().entries() {
            let healthy = entry.destination.publisher.health_check().await;
            if !healthy && entry.enabled {
                warn!(
                    source = %entry.source_account_id,
                    destination = %entry.destination.name,
                    "Destination health check failed"
                );
            }
            reports.push(HealthReport {
                source_account_id: entry.source_account_id.clone(),
                destination: entry.destination.name.clone(),
                enabled: entry.enabled,
                healthy,
            });
        }
        reports
    }

    /// Relay until stopped or the stream fails fatally.
    pub async fn run(&self) -> Result<(), StreamError> {
        self.connector.start_stream(&self.router).await
    }
}

fn routing_entry(route: &RouteConfig) -> Result<RoutingEntry, AppError> {
    let name = route.label();
    let publisher = MisskeyPublisher::new(MisskeyConfig {
        instance_url: route.destination.instance_url.clone(),
        token: route.destination.token.clone(),
        timeout: std::time::Duration::from_secs(route.destination.timeout_seconds),
    })
    .map_err(|source| AppError::Destination {
        name: name.clone(),
        source,
    })?;

    Ok(RoutingEntry {
        source_account_id: route.source.clone(),
        destination: Destination {
            name,
            publisher: Arc::new(publisher) as Arc<dyn Publisher>,
            visibility: route.destination.visibility,
        },
        enabled: route.enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
twitter:
  bearer_token: "abc"
routes:
  - source: "1"
    destination:
      instance_url: "https://one.example"
      token: "t1"
  - source: "2"
    enabled: false
    name: "second"
    destination:
      instance_url: "https://two.example"
      token: "t2"
      visibility: public
"#;

    #[test]
    fn builds_routing_table_from_config() {
        let config = Config::parse(CONFIG).unwrap();
        let relay = Relay::from_config(&config).unwrap();
        let table = relay.router.table();

        assert_eq!(table.len(), 2);
        assert_eq!(table.enabled_count(), 1);
        assert_eq!(table.lookup("1").unwrap().destination.name, "one.example");
        let second = table.get("2").unwrap();
        assert_eq!(second.destination.name, "second");
        assert_eq!(
            second.destination.visibility,
            relaybird_protocol::Visibility::Public
        );
    }

    #[test]
    fn invalid_config_is_rejected_before_wiring() {
        let config = Config::parse("twitter:\n  bearer_token: \"abc\"\n").unwrap();
        let err = Relay::from_config(&config).err().unwrap();
        assert!(matches!(err, AppError::Config(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn unreachable_destinations_report_unhealthy() {
        let config = Config::parse(
            r#"
twitter:
  bearer_token: "abc"
routes:
  - source: "1"
    destination:
      instance_url: "http://127.0.0.1:9"
      token: "t"
      timeout_seconds: 2
"#,
        )
        .unwrap();
        let relay = Relay::from_config(&config).unwrap();

        let reports = relay.health_check().await;
        assert_eq!(
            reports,
            vec![HealthReport {
                source_account_id: "1".to_string(),
                destination: "127.0.0.1".to_string(),
                enabled: true,
                healthy: false,
            }]
        );
    }
}
