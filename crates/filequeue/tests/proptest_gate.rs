//! Property-based tests for the admission gate.
//!
//! Operations are completed by hand in a random order so every interleaving
//! of completions against a full gate gets exercised.

use filequeue::{AdmissionGate, Completion};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Default)]
struct Harness {
    /// Admitted, not yet completed, in admission order.
    in_flight: Mutex<Vec<(usize, Completion<usize>)>>,
    admitted: Mutex<Vec<usize>>,
    delivered: Mutex<Vec<usize>>,
}

fn submit_all(gate: &AdmissionGate, harness: &Arc<Harness>, ids: std::ops::Range<usize>) {
    for id in ids {
        let invoke_side = Arc::clone(harness);
        let complete_side = Arc::clone(harness);
        gate.submit(
            move |completion| {
                invoke_side.admitted.lock().push(id);
                invoke_side.in_flight.lock().push((id, completion));
            },
            move |value: usize| complete_side.delivered.lock().push(value),
        );
    }
}

/// Completes one in-flight operation chosen by `choice`, outside any lock.
fn complete_one(harness: &Harness, choice: usize) -> usize {
    let (id, completion) = {
        let mut in_flight = harness.in_flight.lock();
        let idx = choice % in_flight.len();
        in_flight.remove(idx)
    };
    completion.complete(id * 3 + 1);
    id
}

proptest! {
    #[test]
    fn test_in_flight_never_exceeds_limit(
        limit in 1usize..8,
        count in 1usize..80,
        choices in proptest::collection::vec(any::<usize>(), 1..32),
    ) {
        let gate = AdmissionGate::new(limit);
        let harness = Arc::new(Harness::default());
        submit_all(&gate, &harness, 0..count);

        let mut step = 0;
        loop {
            let running = harness.in_flight.lock().len();
            prop_assert!(running <= limit);
            prop_assert_eq!(gate.in_flight(), running);
            if running == 0 {
                break;
            }
            complete_one(&harness, choices[step % choices.len()]);
            step += 1;
        }

        // every operation was admitted and completed exactly once
        prop_assert_eq!(step, count);
        prop_assert_eq!(gate.queued(), 0);
        prop_assert_eq!(gate.stats().peak_in_flight, limit.min(count));
    }

    #[test]
    fn test_admission_is_fifo(
        limit in 1usize..6,
        first in 1usize..30,
        second in 0usize..30,
        choices in proptest::collection::vec(any::<usize>(), 1..16),
    ) {
        let gate = AdmissionGate::new(limit);
        let harness = Arc::new(Harness::default());
        submit_all(&gate, &harness, 0..first);

        // complete a few, then submit more while the gate is still busy
        for choice in choices.iter().take(first / 2) {
            complete_one(&harness, *choice);
        }
        submit_all(&gate, &harness, first..first + second);

        let mut step = 0;
        while !harness.in_flight.lock().is_empty() {
            complete_one(&harness, choices[step % choices.len()]);
            step += 1;
        }

        let expected: Vec<usize> = (0..first + second).collect();
        prop_assert_eq!(harness.admitted.lock().clone(), expected);
    }

    #[test]
    fn test_results_delivered_unchanged(
        limit in 1usize..6,
        count in 1usize..40,
        choices in proptest::collection::vec(any::<usize>(), 1..16),
    ) {
        let gate = AdmissionGate::new(limit);
        let harness = Arc::new(Harness::default());
        submit_all(&gate, &harness, 0..count);

        let mut order = Vec::new();
        let mut step = 0;
        while !harness.in_flight.lock().is_empty() {
            order.push(complete_one(&harness, choices[step % choices.len()]));
            step += 1;
        }

        let expected: Vec<usize> = order.iter().map(|id| id * 3 + 1).collect();
        prop_assert_eq!(harness.delivered.lock().clone(), expected);
    }
}
