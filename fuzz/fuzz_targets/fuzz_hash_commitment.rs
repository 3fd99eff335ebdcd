#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use crash_fairness::hash;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    seed: [u8; 32],
    round_number: u64,
}

fuzz_target!(|data: FuzzInput| {
    let first = hash(&data.seed, data.round_number);
    let second = hash(&data.seed, data.round_number);
    assert_eq!(first, second, "hash must be a pure function of (seed, round_number)");

    if data.round_number != u64::MAX {
        let next = hash(&data.seed, data.round_number + 1);
        assert_ne!(first, next, "adjacent round numbers must not collide for the same seed");
    }
});
