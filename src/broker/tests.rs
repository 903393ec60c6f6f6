use super::*;

#[test]
fn test_broker_config_default() {
    let config = BrokerConfig::default();
    assert_eq!(config.broker_type, BrokerType::Redis);
    assert_eq!(config.redis.url, "redis://localhost:6379");
}

#[test]
fn test_broker_type_deserializes_lowercase() {
    let config: BrokerConfig = serde_json::from_str(r#"{"type":"channel"}"#).unwrap();
    assert_eq!(config.broker_type, BrokerType::Channel);
    assert_eq!(config.redis.url, "redis://localhost:6379");

    let config: BrokerConfig =
        serde_json::from_str(r#"{"type":"redis","redis":{"url":"redis://cache:6380"}}"#).unwrap();
    assert_eq!(config.broker_type, BrokerType::Redis);
    assert_eq!(config.redis.url, "redis://cache:6380");
}

#[test]
fn test_broker_type_rejects_unknown() {
    let result: std::result::Result<BrokerConfig, _> = serde_json::from_str(r#"{"type":"kafka"}"#);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_init_broker_channel() {
    let config = BrokerConfig {
        broker_type: BrokerType::Channel,
        ..Default::default()
    };
    let broker = init_broker(&config).await.unwrap();

    let mut subscription = broker.subscribe("users").await.unwrap();
    broker
        .publish("users", Bytes::from_static(b"hello"))
        .await
        .unwrap();

    assert_eq!(subscription.receive().await.unwrap(), Bytes::from_static(b"hello"));
}

#[cfg(not(feature = "redis"))]
#[tokio::test]
async fn test_init_broker_redis_requires_feature() {
    let result = init_broker(&BrokerConfig::default()).await;
    assert!(matches!(result, Err(BrokerError::FeatureDisabled("redis"))));
}
