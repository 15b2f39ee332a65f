mod common;

use common::strategies::*;
use conductor_core::{CallbackRegistry, ExecutionQueue, Payload, PipelineRequest, Priority};
use proptest::prelude::*;
use std::time::Duration;

fn rank(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Chained => 1,
        Priority::Normal => 2,
    }
}

fn drain(queue: &mut ExecutionQueue) -> Vec<PipelineRequest> {
    std::iter::from_fn(|| queue.dequeue()).collect()
}

fn fill(priorities: &[Priority]) -> ExecutionQueue {
    let mut queue = ExecutionQueue::new();
    for (i, priority) in priorities.iter().enumerate() {
        queue
            .enqueue(PipelineRequest::new(format!("r{i}"), "pipeline", *priority))
            .unwrap();
    }
    queue
}

proptest! {
    /// Property: dequeue order never lets a lower class overtake a higher one
    #[test]
    fn dequeue_order_is_partitioned_by_priority(priorities in priority_sequence_strategy()) {
        let mut queue = fill(&priorities);
        let order = drain(&mut queue);

        prop_assert_eq!(order.len(), priorities.len());
        for pair in order.windows(2) {
            prop_assert!(rank(pair[0].priority) <= rank(pair[1].priority),
                "{} ({}) came before {} ({})",
                pair[0].request_id, pair[0].priority, pair[1].request_id, pair[1].priority);
        }
    }

    /// Property: normal requests keep submission order
    #[test]
    fn normal_requests_are_fifo(priorities in priority_sequence_strategy()) {
        let mut queue = fill(&priorities);
        let sequences: Vec<u64> = drain(&mut queue)
            .into_iter()
            .filter(|r| r.priority == Priority::Normal)
            .filter_map(|r| r.sequence)
            .collect();

        prop_assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    /// Property: every request is dequeued exactly once and status adds up
    #[test]
    fn every_request_dequeued_once(priorities in priority_sequence_strategy()) {
        let mut queue = fill(&priorities);
        prop_assert_eq!(queue.status().pending, priorities.len());
        prop_assert_eq!(queue.status().length, priorities.len());

        let mut ids: Vec<String> = drain(&mut queue).into_iter().map(|r| r.request_id).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), priorities.len());
        prop_assert!(queue.is_empty());
    }

    /// Property: pipeline names pass enqueue validation
    #[test]
    fn generated_pipeline_names_enqueue(name in pipeline_name_strategy(), priority in priority_strategy()) {
        let mut queue = ExecutionQueue::new();
        prop_assert!(queue.enqueue(PipelineRequest::new("r", name, priority)).is_ok());
    }

    /// Property: preserve leaves no callbacks behind and rehydrate restores all of them
    #[test]
    fn preserve_then_rehydrate_restores_every_callback(payload in payload_strategy()) {
        let registry = CallbackRegistry::new(Duration::from_secs(60));
        let expected = count_callbacks(&payload);

        // Correlation ids live on an object root
        let mut wire = Payload::object([("data", payload)]);
        let preserved = registry.preserve_in_place(&mut wire);
        prop_assert_eq!(preserved.count, expected);
        prop_assert_eq!(count_callbacks(&wire), 0);

        let mut received = Payload::from_json(wire.to_json());
        let restored = registry.rehydrate_in_place(&mut received);
        prop_assert_eq!(restored, expected);
        prop_assert_eq!(count_callbacks(&received), expected);
    }
}
