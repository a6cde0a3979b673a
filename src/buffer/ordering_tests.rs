//! Property tests for the ingestion buffer.
//!
//! Random interleavings of enqueues, explicit flushes and size thresholds
//! must never lose, duplicate or reorder records, and draining without a
//! reset must be repeatable.

use proptest::prelude::*;
use tempfile::TempDir;

use super::{BufferOptions, IngestionBuffer};
use crate::model::ChangeRecord;

#[derive(Clone, Debug)]
enum Step {
    Push { user: u8, body: String },
    Flush,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0u8..3, "[a-z \n]{0,40}").prop_map(|(user, body)| Step::Push { user, body }),
        1 => Just(Step::Flush),
    ]
}

fn open(dir: &TempDir, threshold: usize) -> IngestionBuffer {
    let options =
        BufferOptions::new(dir.path().join("pending.jsonl")).with_max_buffer_bytes(threshold);
    IngestionBuffer::open(options).unwrap()
}

/// Apply `steps`, returning the ids pushed, in order.
fn run(buffer: &IngestionBuffer, steps: &[Step]) -> Vec<String> {
    let mut pushed = Vec::new();
    for step in steps {
        match step {
            Step::Push { user, body } => {
                let id = pushed.len().to_string();
                let record =
                    ChangeRecord::edit(id.as_str(), format!("user{user}"), "f.txt", body.as_str());
                buffer.enqueue(record).unwrap();
                pushed.push(id);
            }
            Step::Flush => {
                buffer.flush_now().unwrap();
            }
        }
    }
    pushed
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn drain_returns_every_record_in_push_order(
        steps in prop::collection::vec(arb_step(), 0..40),
        threshold in 1usize..2048,
    ) {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir, threshold);
        let pushed = run(&buffer, &steps);

        let drained: Vec<String> = buffer.drain_all().unwrap().into_iter().map(|r| r.id).collect();
        prop_assert_eq!(drained, pushed);
    }

    #[test]
    fn repeated_drain_without_reset_is_stable(
        steps in prop::collection::vec(arb_step(), 0..30),
        threshold in 1usize..1024,
    ) {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir, threshold);
        run(&buffer, &steps);

        let first = buffer.drain_all().unwrap();
        let second = buffer.drain_all().unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn reset_through_keeps_exactly_the_late_records(
        early in prop::collection::vec(arb_step(), 0..20),
        late in prop::collection::vec(arb_step(), 0..20),
    ) {
        let dir = TempDir::new().unwrap();
        let buffer = open(&dir, 512);
        run(&buffer, &early);
        let batch = buffer.drain_all().unwrap();

        let mut late_ids = Vec::new();
        for (i, step) in late.iter().enumerate() {
            if let Step::Push { body, .. } = step {
                let id = format!("late-{i}");
                buffer.enqueue(ChangeRecord::edit(id.as_str(), "late", "g.txt", body.as_str())).unwrap();
                late_ids.push(id);
            }
        }
        buffer.reset_through(&batch).unwrap();

        let rest: Vec<String> = buffer.drain_all().unwrap().into_iter().map(|r| r.id).collect();
        prop_assert_eq!(rest, late_ids);
    }
}
