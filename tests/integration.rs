mod integration {
    mod end_to_end {
        extern crate dory;

        use self::dory::broker::Broker;
        use self::dory::conf::{self, BatchingConf, Conf, InputSourcesConf, UnixDgramConf};
        use self::dory::discard;
        use self::dory::message::{Message, MessageKind};
        use self::dory::metadata::{MetadataMap, MetadataSnapshot, PartitionMeta, TopicMeta};
        use self::dory::pool::Pool;
        use self::dory::router::{Admit, Router};
        use self::dory::wire;
        use std::collections::HashMap;
        use std::path::PathBuf;
        use std::sync::Arc;

        fn broker(id: i32) -> Broker {
            Broker::new(id, "127.0.0.1:9092".parse().unwrap(), "127.0.0.1".to_string(), 9092)
        }

        /// A minimal valid configuration: one bootstrap broker, one UNIX
        /// datagram source, everything else at its default. Built directly
        /// rather than via `conf::test_util` -- that helper is
        /// `#[cfg(test)]`-gated into the library's own unit-test build and
        /// isn't visible to this separately compiled integration binary.
        fn minimal_conf() -> Conf {
            Conf {
                initial_brokers: vec!["localhost:9092".to_string()],
                batching: BatchingConf::default(),
                compression: Default::default(),
                topic_rate_limiting: HashMap::new(),
                input_sources: InputSourcesConf {
                    unix_dgram: Some(UnixDgramConf {
                        path: PathBuf::from("/tmp/dory-integration-test.sock"),
                        max_msg_size: 64 * 1024,
                    }),
                    unix_stream: None,
                    tcp: None,
                },
                msg_delivery: Default::default(),
                http_interface: Default::default(),
                discard_reporting: Default::default(),
                logging: Default::default(),
                msg_buffer_max_kb: 64 * 1024,
                pool_block_size_kb: 128,
            }
        }

        fn snapshot_with_partitions(topic: &str, leader: i32, partitions: i32) -> MetadataSnapshot {
            let mut parts = HashMap::new();
            for p in 0..partitions {
                parts.insert(
                    p,
                    PartitionMeta {
                        leader_broker_id: Some(leader),
                        generation: 1,
                    },
                );
            }
            let mut topics = HashMap::new();
            topics.insert(
                topic.to_string(),
                TopicMeta {
                    partitions: parts,
                    error_code: None,
                    last_refresh_ms: 0,
                },
            );
            let mut brokers = HashMap::new();
            brokers.insert(leader, broker(leader));
            MetadataSnapshot {
                topics,
                brokers,
                fetched_at_ms: 0,
            }
        }

        /// Pool accounting invariant (spec section 8, invariant 1): free
        /// bytes plus bytes owned by outstanding handles always equals
        /// capacity.
        #[test]
        fn pool_accounting_holds_across_acquire_and_drop() {
            let pool = Pool::new(1_024, 128);
            assert_eq!(pool.free_bytes(), pool.capacity_bytes());

            let a = pool.try_acquire(64).expect("room for one block");
            let b = pool.try_acquire(64).expect("room for a second block");
            assert_eq!(pool.free_bytes(), pool.capacity_bytes() - 2 * 128);

            drop(a);
            assert_eq!(pool.free_bytes(), pool.capacity_bytes() - 128);
            drop(b);
            assert_eq!(pool.free_bytes(), pool.capacity_bytes());
        }

        /// Boundary behavior (spec section 8): a pool sized for exactly one
        /// max-size message rejects a second concurrent acquire.
        #[test]
        fn pool_exhaustion_rejects_second_concurrent_acquire() {
            let pool = Pool::new(128, 128);
            let _first = pool.try_acquire(128).expect("first max-size message fits");
            assert!(pool.try_acquire(128).is_none());
        }

        /// Wire encode/decode is a bijection on valid messages (spec
        /// section 8).
        #[test]
        fn wire_round_trip_preserves_fields() {
            let msg = wire::WireMessage {
                topic: "orders".to_string(),
                partition_key: Some(b"customer-42".to_vec()),
                value: b"{\"total\":4200}".to_vec(),
                client_timestamp_ms: 1_700_000_000_000,
            };
            let encoded = wire::encode(&msg);
            let decoded = wire::decode(&encoded, 64 * 1024).expect("round trip decodes");
            assert_eq!(decoded.topic, msg.topic);
            assert_eq!(decoded.partition_key, msg.partition_key);
            assert_eq!(decoded.value, msg.value);
            assert_eq!(decoded.client_timestamp_ms, msg.client_timestamp_ms);
        }

        /// A malformed frame is rejected with no pool side effects (spec
        /// section 8, scenario 5).
        #[test]
        fn malformed_frame_is_rejected() {
            let garbage = [0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF];
            let err = wire::decode(&garbage, 64 * 1024).expect_err("bad magic must not decode");
            match err {
                wire::WireError::BadMagic(_) => {}
                other => panic!("expected BadMagic, got {:?}", other),
            }
        }

        /// Config survives a TOML round trip unchanged (spec section 8).
        #[test]
        fn config_round_trips_through_toml() {
            let original = minimal_conf();
            let serialized = conf::to_toml_string(&original);
            let reparsed = conf::parse(&serialized).expect("round-tripped config reparses");
            assert_eq!(original.initial_brokers, reparsed.initial_brokers);
            assert_eq!(original.msg_buffer_max_kb, reparsed.msg_buffer_max_kb);
            assert_eq!(original.http_interface.port, reparsed.http_interface.port);
        }

        /// Partition-key ordering (spec section 8, scenario 2): two
        /// messages sharing a partition key land in the same batch, in
        /// admission order.
        #[test]
        fn same_key_messages_land_in_one_batch_in_order() {
            let metadata = Arc::new(MetadataMap::new());
            metadata.publish(Arc::new(snapshot_with_partitions("t", 0, 4)));

            let mut router = Router::new(Arc::clone(&metadata), minimal_conf().batching, 16);
            let pool = Pool::new(4_096, 256);

            let key: Box<[u8]> = b"k".to_vec().into_boxed_slice();
            let kind = MessageKind::PartitionKey(self::dory::source::fnv_hash32(&key));

            let first = Message::new(
                Arc::from("t"),
                Some(key.clone()),
                pool.try_acquire(1).unwrap(),
                0,
                0,
                kind,
            );
            let second = Message::new(Arc::from("t"), Some(key), pool.try_acquire(1).unwrap(), 1, 1, kind);

            match router.admit(first, 0) {
                Admit::Appended | Admit::Sealed(_) => {}
                _ => panic!("first message with a known leader must route"),
            }
            match router.admit(second, 1) {
                Admit::Appended | Admit::Sealed(_) => {}
                _ => panic!("second message with a known leader must route"),
            }

            let outcome = router.tick(10_000, 30_000);
            let sealed = outcome.sealed;
            assert_eq!(sealed.len(), 1, "both messages share a fingerprint and age out together");
            let messages = sealed.into_iter().next().unwrap().into_messages();
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].created_monotonic_ms(), 0);
            assert_eq!(messages[1].created_monotonic_ms(), 1);
        }

        /// A topic with no known leader parks messages, then discards them
        /// with `NoLeader` once `max_retry_ms` has elapsed (spec section 8,
        /// boundary behavior).
        #[test]
        fn unrouted_topic_parks_then_discards_after_deadline() {
            let metadata = Arc::new(MetadataMap::new());
            let mut router = Router::new(Arc::clone(&metadata), minimal_conf().batching, 16);
            let pool = Pool::new(4_096, 256);

            let message = Message::new(
                Arc::from("unknown-topic"),
                None,
                pool.try_acquire(1).unwrap(),
                0,
                0,
                MessageKind::AnyPartition,
            );

            match router.admit(message, 0) {
                Admit::Parked => {}
                _ => panic!("a topic with no leader info must park, not route"),
            }

            let outcome = router.tick(100, 50);
            assert_eq!(outcome.discarded.len(), 1);
            assert_eq!(outcome.discarded[0].0, discard::Reason::NoLeader);
        }

        /// The discard tracker never grows past its configured capacity;
        /// eviction collapses entries without losing counted totals (spec
        /// section 8, invariant 4).
        #[test]
        fn discard_tracker_caps_entries_without_losing_counts() {
            let mut tracker = discard::Tracker::new(4);
            for i in 0..20 {
                let topic = format!("topic-{}", i);
                tracker.record(&topic, discard::Reason::TooLarge, i as u64, b"x");
            }
            assert!(tracker.len() <= 4);
            assert_eq!(tracker.total_count(), 20);
        }
    }
}
