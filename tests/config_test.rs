use std::io::Write;
use std::time::Duration;

use tenancy::config::ConfigError;
use tenancy::scoring::{by_attribute, constant};
use tenancy::{Error, Market, MarketConfig};
use tempfile::NamedTempFile;

#[test]
fn test_market_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "event_buffer_size": 64,
            "shutdown_timeout": 250,
            "resource": {{ "mailbox_capacity": 8 }},
            "actor": {{ "interval": 20, "exit_probability": 0.1, "seed": 3 }}
        }}"#
    )
    .unwrap();

    let config = MarketConfig::from_file(file.path()).unwrap();
    assert_eq!(config.event_buffer_size, 64);
    assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
    assert_eq!(config.resource.mailbox_capacity, 8);
    assert_eq!(config.actor.interval, Duration::from_millis(20));
    assert_eq!(config.actor.seed, Some(3));
    // unset status timeout follows the interval
    assert_eq!(config.actor.status_timeout(), Duration::from_millis(20));
}

#[tokio::test]
async fn test_market_rejects_bad_actor_override() {
    let market = Market::new(MarketConfig::default()).unwrap();
    let mut bad = market.config().actor.clone();
    bad.exit_probability = f64::NAN;

    let result = market.add_actor_with_config(by_attribute("quality"), constant(1.0), bad);
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::InvalidValue {
            field: "exit_probability",
            ..
        }))
    ));
    assert_eq!(market.actor_count(), 0);
}
