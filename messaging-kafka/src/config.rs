use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use messaging::{
    DeadLetterFailedMessages, DeadLetterSink, DelayAndRetryOnRecoverableErrors,
    DiscardFailedMessages, FailedMessageProcessor, ProcessorConfig, SimpleRetryDelayer,
};
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    pub kafka_consumer_group: String,

    // The service inbox, e.g. inbox-com.example.orders
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Records a single partition may hold before fetching from it is paused
    #[envconfig(default = "100")]
    pub max_messages_in_flight: usize,

    #[envconfig(default = "1000")]
    pub retry_delay_ms: u64,

    // Upper bound for all retry delays spent on one message
    #[envconfig(default = "60000")]
    pub retry_budget_ms: u64,

    #[envconfig(default = "5000")]
    pub commit_interval_ms: u64,

    #[envconfig(default = "10000")]
    pub shutdown_timeout_ms: u64,

    // Failed messages are discarded when unset
    pub dead_letter_topic: Option<String>,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

impl Config {
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_messages_in_flight: self.max_messages_in_flight,
        }
    }

    pub fn retry_delayer(&self) -> SimpleRetryDelayer {
        SimpleRetryDelayer::from_millis(self.retry_delay_ms, self.retry_budget_ms)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.kafka_message_timeout_ms))
    }

    /// Retry recoverable failures within the configured budget, then dead-letter the message
    /// if a sink is given, otherwise discard it.
    pub fn failed_message_processor(
        &self,
        dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
    ) -> Arc<dyn FailedMessageProcessor> {
        let discard: Arc<dyn FailedMessageProcessor> = Arc::new(DiscardFailedMessages);
        let fallback: Arc<dyn FailedMessageProcessor> = match dead_letter_sink {
            Some(sink) => Arc::new(DeadLetterFailedMessages::new(sink, discard)),
            None => discard,
        };

        Arc::new(DelayAndRetryOnRecoverableErrors::new(
            fallback,
            Arc::new(self.retry_delayer()),
        ))
    }

    /// Offsets are committed explicitly from processor watermarks, never automatically.
    pub fn consumer_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("group.id", &self.kafka_consumer_group)
            .set("auto.offset.reset", &self.kafka_consumer_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        self.apply_tls(&mut client_config);
        client_config
    }

    pub fn producer_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", self.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                self.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", self.kafka_compression_codec.to_owned())
            .set(
                "queue.buffering.max.kbytes",
                (self.kafka_producer_queue_mib * 1024).to_string(),
            );

        self.apply_tls(&mut client_config);
        client_config
    }

    fn apply_tls(&self, client_config: &mut ClientConfig) {
        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::init_from_hashmap(&env).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[
            ("KAFKA_CONSUMER_GROUP", "orders"),
            ("KAFKA_CONSUMER_TOPIC", "inbox-com.example.orders"),
        ]);

        assert_eq!(config.kafka_hosts, "localhost:9092");
        assert_eq!(config.processor_config().max_messages_in_flight, 100);
        assert_eq!(config.retry_delayer().max_attempts(), 60);
        assert_eq!(config.commit_interval(), Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.dead_letter_topic, None);
    }

    #[test]
    fn test_consumer_group_is_required() {
        let env = HashMap::from([(
            "KAFKA_CONSUMER_TOPIC".to_string(),
            "inbox-com.example.orders".to_string(),
        )]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn test_client_configs() {
        let config = config_from(&[
            ("KAFKA_HOSTS", "kafka:9092"),
            ("KAFKA_TLS", "true"),
            ("KAFKA_CONSUMER_GROUP", "orders"),
            ("KAFKA_CONSUMER_TOPIC", "inbox-com.example.orders"),
            ("KAFKA_CONSUMER_OFFSET_RESET", "latest"),
        ]);

        let consumer = config.consumer_client_config();
        assert_eq!(consumer.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(consumer.get("group.id"), Some("orders"));
        assert_eq!(consumer.get("auto.offset.reset"), Some("latest"));
        assert_eq!(consumer.get("enable.auto.commit"), Some("false"));
        assert_eq!(consumer.get("security.protocol"), Some("ssl"));

        let producer = config.producer_client_config();
        assert_eq!(producer.get("linger.ms"), Some("20"));
        assert_eq!(producer.get("queue.buffering.max.kbytes"), Some("409600"));
    }
}
