#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use livemodel::{ChangeRecord, ObservableList, update_array};

#[derive(Debug, Arbitrary)]
struct Input {
    current: Vec<u8>,
    desired: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // A small alphabet keeps the two sides overlapping.
    let current: Vec<u8> = input.current.iter().take(64).map(|b| b % 16).collect();
    let desired: Vec<u8> = input.desired.iter().take(64).map(|b| b % 16).collect();

    let list = ObservableList::new(current.clone());
    let records = update_array(&list, &desired).expect("no handlers attached");
    assert_eq!(list.to_vec(), desired);

    let mut removed = 0;
    let mut added = 0;
    for record in &records {
        assert!(!record.is_empty(), "no-op record {record:?}");
        match record {
            ChangeRecord::Remove { items, .. } => removed += items.len(),
            ChangeRecord::Add { items, .. } => added += items.len(),
            ChangeRecord::Reorder { .. } => {}
            ChangeRecord::Replace { .. } => panic!("differ emitted a replace"),
        }
    }
    assert_eq!(current.len() - removed + added, desired.len());
});
