#![forbid(unsafe_code)]

//! Property tests for the list differ.

use std::collections::HashMap;

use livemodel::{ChangeKind, ObservableList, diff, update_array};
use livemodel_harness::{ListRecorder, permutation_pair, replay, sequence_pair};
use proptest::prelude::*;

fn shared_count(a: &[u8], b: &[u8]) -> usize {
    let mut counts: HashMap<u8, usize> = HashMap::new();
    for item in a {
        *counts.entry(*item).or_default() += 1;
    }
    let mut shared = 0;
    for item in b {
        if let Some(count) = counts.get_mut(item)
            && *count > 0
        {
            *count -= 1;
            shared += 1;
        }
    }
    shared
}

proptest! {
    #[test]
    fn update_array_reaches_desired(pair in sequence_pair(24)) {
        let (current, desired) = pair;
        let list = ObservableList::new(current.clone());
        let recorder = ListRecorder::new(&list);

        let records = update_array(&list, &desired).unwrap();

        prop_assert_eq!(list.to_vec(), desired.clone());
        prop_assert_eq!(recorder.batches(), usize::from(current != desired));
        for record in &records {
            prop_assert!(!record.is_empty(), "no-op record {:?}", record);
        }

        let mut replayed = current.clone();
        replay(&mut replayed, &records, &desired);
        prop_assert_eq!(replayed, desired);
    }

    #[test]
    fn plan_moves_shared_items_instead_of_re_adding(pair in sequence_pair(24)) {
        let (current, desired) = pair;
        let plan = diff(&current, &desired);
        let shared = shared_count(&current, &desired);

        prop_assert_eq!(plan.removed_count(), current.len() - shared);
        prop_assert_eq!(plan.added_count(), desired.len() - shared);

        let mut applied = current.clone();
        plan.apply_to(&mut applied);
        prop_assert_eq!(applied, desired);
    }

    #[test]
    fn permutations_only_reorder(pair in permutation_pair(16)) {
        let (current, desired) = pair;
        let records = diff(&current, &desired).records();
        prop_assert!(records.len() <= 1);
        for record in &records {
            prop_assert_eq!(record.kind(), ChangeKind::Reorder);
        }
    }
}

#[test]
fn documented_scenarios() {
    let cases: [(&[u8], &[u8]); 6] = [
        (&[], &[1, 2, 3]),
        (&[1, 2, 3], &[]),
        (&[1, 2, 3], &[3, 2, 1]),
        (&[1, 2, 3, 4], &[3, 1, 4, 2]),
        (&[1, 2, 3, 4, 5], &[1, 4]),
        (&[2, 5], &[1, 2, 3, 4, 5]),
    ];
    for (current, desired) in cases {
        let list = ObservableList::new(current.iter().copied());
        let records = update_array(&list, desired).unwrap();
        assert_eq!(list.to_vec(), desired, "{current:?} -> {desired:?}");
        let mut replayed = current.to_vec();
        replay(&mut replayed, &records, desired);
        assert_eq!(replayed, desired);
    }
}
