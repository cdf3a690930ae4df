use chat_analytics::analysis::trend;
use chat_analytics::domain::enrichment::Enricher;
use chat_analytics::domain::events::{Event, EventId, EventKind, TokenUsage};
use chat_analytics::domain::metrics::{AggregateBucket, IntervalType, Tags, TimeRange};
use chat_analytics::processor::{InMemoryDeadLetterSink, ProcessorConfig, StreamProcessor};
use chat_analytics::publisher::{Delta, DeltaSink};
use chat_analytics::store::{InMemoryStore, TimeSeriesStore};
use chrono::Duration;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::generators::{base_time, metric, points};
use crate::runtime;

struct Discard;

impl DeltaSink for Discard {
    fn publish(&self, _delta: Delta) {}
}

type BucketState = BTreeMap<(i64, String), (u64, f64, f64, f64)>;

async fn bucket_state(store: &InMemoryStore, interval: IntervalType) -> BucketState {
    let range = TimeRange::new(base_time(), base_time() + Duration::days(1)).unwrap();
    store
        .buckets(&metric(), interval, &range, &Tags::new())
        .await
        .unwrap()
        .iter()
        .map(|b: &AggregateBucket| {
            (
                (b.bucket_start().timestamp(), b.tags().fingerprint()),
                (b.count(), b.sum(), b.min(), b.max()),
            )
        })
        .collect()
}

fn token_events(values: &[u32]) -> Vec<Event> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            Event::new(
                EventId::try_new(format!("evt-{i}")).unwrap(),
                base_time() + Duration::seconds(i as i64 * 37),
                EventKind::TokenUsage(TokenUsage {
                    model: "gpt-4o".to_string(),
                    prompt_tokens: u64::from(*v),
                    completion_tokens: 0,
                }),
            )
        })
        .collect()
}

fn processor(store: Arc<InMemoryStore>) -> StreamProcessor {
    StreamProcessor::new(
        &ProcessorConfig::default(),
        Enricher::default(),
        store,
        Arc::new(InMemoryDeadLetterSink::new()),
        Arc::new(Discard),
    )
}

proptest! {
    #[test]
    fn redelivery_does_not_change_buckets(
        values in prop::collection::vec(0u32..10_000, 1..50),
        redeliver in prop::collection::vec(any::<prop::sample::Index>(), 1..20),
    ) {
        runtime().block_on(async {
            let events = token_events(&values);

            let once = Arc::new(InMemoryStore::default());
            processor(once.clone()).process_batch(events.clone()).await;

            let twice = Arc::new(InMemoryStore::default());
            let redelivering = processor(twice.clone());
            redelivering.process_batch(events.clone()).await;
            let duplicates: Vec<Event> =
                redeliver.iter().map(|i| i.get(&events).clone()).collect();
            let outcome = redelivering.process_batch(duplicates).await;

            prop_assert_eq!(outcome.accepted, 0);
            for interval in IntervalType::ALL {
                prop_assert_eq!(
                    bucket_state(&once, interval).await,
                    bucket_state(&twice, interval).await
                );
            }
            Ok(())
        })?;
    }

    #[test]
    fn batch_order_does_not_change_buckets(
        points in points(),
        batch_size in 1usize..20,
        seed in any::<u64>(),
    ) {
        runtime().block_on(async {
            let forward = InMemoryStore::default();
            for chunk in points.chunks(batch_size) {
                forward.write_points(&metric(), chunk).await.unwrap();
            }

            // deterministic shuffle of the batch order
            let mut chunks: Vec<_> = points.chunks(batch_size).collect();
            let len = chunks.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                chunks.swap(i, (state >> 33) as usize % (i + 1));
            }
            let shuffled = InMemoryStore::default();
            for chunk in chunks {
                shuffled.write_points(&metric(), chunk).await.unwrap();
            }

            for interval in IntervalType::ALL {
                prop_assert_eq!(
                    bucket_state(&forward, interval).await,
                    bucket_state(&shuffled, interval).await
                );
            }
            Ok(())
        })?;
    }

    #[test]
    fn minute_buckets_add_up_to_hour_buckets(points in points()) {
        runtime().block_on(async {
            let store = InMemoryStore::default();
            store.write_points(&metric(), &points).await.unwrap();

            let minutes = bucket_state(&store, IntervalType::OneMinute).await;
            let hours = bucket_state(&store, IntervalType::OneHour).await;

            let mut rolled_up: BucketState = BTreeMap::new();
            for ((start, tags), (count, sum, min, max)) in minutes {
                let hour = start.div_euclid(3600) * 3600;
                let entry = rolled_up
                    .entry((hour, tags))
                    .or_insert((0, 0.0, f64::INFINITY, f64::NEG_INFINITY));
                entry.0 += count;
                entry.1 += sum;
                entry.2 = entry.2.min(min);
                entry.3 = entry.3.max(max);
            }

            prop_assert_eq!(rolled_up.len(), hours.len());
            for (key, (count, sum, min, max)) in hours {
                let (r_count, r_sum, r_min, r_max) = rolled_up[&key];
                prop_assert_eq!(count, r_count);
                prop_assert!((sum - r_sum).abs() <= 1e-9 * sum.abs().max(1.0));
                prop_assert_eq!(min, r_min);
                prop_assert_eq!(max, r_max);
            }
            Ok(())
        })?;
    }

    #[test]
    fn trend_is_deterministic(values in prop::collection::vec(-1e6f64..1e6, 3..100)) {
        let first = trend(&values).unwrap();
        let second = trend(&values).unwrap();
        prop_assert_eq!(first.slope.to_bits(), second.slope.to_bits());
        prop_assert_eq!(first.confidence.to_bits(), second.confidence.to_bits());
    }
}
