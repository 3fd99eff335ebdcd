#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crash_ledger::Ledger;
use crash_types::Asset;

#[derive(Arbitrary, Debug)]
enum Op {
    Credit(u32),
    Debit(u32),
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<Op>,
}

fuzz_target!(|data: FuzzInput| {
    let ledger = Ledger::new();
    ledger
        .create_player("fuzz-player".to_string(), "fuzz-player-name".to_string(), HashMap::new())
        .unwrap();

    let mut expected = Decimal::ZERO;

    for op in data.ops.iter().take(256) {
        match op {
            Op::Credit(amount) => {
                let amount = Decimal::new(*amount as i64 % 1_000_000, 2);
                if amount <= Decimal::ZERO {
                    continue;
                }
                let balance = ledger.credit("fuzz-player", Asset::Btc, amount).unwrap();
                expected += amount;
                assert_eq!(balance, expected);
            }
            Op::Debit(amount) => {
                let amount = Decimal::new(*amount as i64 % 1_000_000, 2);
                if amount <= Decimal::ZERO {
                    continue;
                }
                match ledger.debit("fuzz-player", Asset::Btc, amount) {
                    Ok(balance) => {
                        expected -= amount;
                        assert_eq!(balance, expected);
                    }
                    Err(_) => {
                        assert!(amount > expected, "debit rejected despite sufficient balance");
                    }
                }
            }
        }
        assert!(expected >= Decimal::ZERO, "ledger balance went negative");
    }
});
