#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rust_decimal::Decimal;

use crash_fairness::crash_point;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    seed: [u8; 32],
    round_number: u64,
    max_crash_cents: u32,
}

fuzz_target!(|data: FuzzInput| {
    // Keep max_crash in a realistic, always-above-one range.
    let max_crash = Decimal::new((data.max_crash_cents as i64).saturating_add(101), 2);

    let cp = crash_point(&data.seed, data.round_number, max_crash);
    assert!(cp >= Decimal::ONE, "crash point {cp} fell below 1.00");
    assert!(cp <= max_crash, "crash point {cp} exceeded max_crash {max_crash}");
    assert_eq!(
        cp,
        crash_point(&data.seed, data.round_number, max_crash),
        "crash point must be deterministic for identical inputs"
    );
});
