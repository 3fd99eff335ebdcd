#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rust_decimal::Decimal;

use crash_fairness::{crash_point, verify};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    seed: [u8; 32],
    round_number: u64,
    max_crash_cents: u32,
}

fuzz_target!(|data: FuzzInput| {
    let max_crash = Decimal::new((data.max_crash_cents as i64).saturating_add(101), 2);
    let cp = crash_point(&data.seed, data.round_number, max_crash);

    assert!(
        verify(&data.seed, data.round_number, cp, max_crash),
        "a round's own seed must always verify its own crash point"
    );

    // A claimed crash point far enough from the recomputed one must fail,
    // unless the offset happens to wrap around through the max_crash clamp.
    let tampered = cp + Decimal::new(50, 0);
    if tampered <= max_crash {
        assert!(
            !verify(&data.seed, data.round_number, tampered, max_crash),
            "a materially different claimed crash point must not verify"
        );
    }
});
