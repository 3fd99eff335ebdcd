#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crash_ledger::Ledger;
use crash_types::Asset;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    deposit_amount: u32,
    price_cents: u32,
    withdraw_amount: u32,
}

fuzz_target!(|data: FuzzInput| {
    let ledger = Ledger::new();
    ledger
        .create_player("fuzz-player".to_string(), "fuzz-player-name".to_string(), HashMap::new())
        .unwrap();

    let deposit_amount = Decimal::new(data.deposit_amount as i64 % 1_000_000, 2);
    let price = Decimal::new((data.price_cents as i64 % 10_000_000).saturating_add(1), 2);
    if deposit_amount <= Decimal::ZERO {
        return;
    }

    let after_deposit = ledger.deposit("fuzz-player", Asset::Btc, deposit_amount, price, 0).unwrap();
    assert_eq!(after_deposit, deposit_amount);

    let withdraw_amount = Decimal::new(data.withdraw_amount as i64 % 2_000_000, 2);
    if withdraw_amount <= Decimal::ZERO {
        return;
    }

    let result = ledger.withdraw("fuzz-player", Asset::Btc, withdraw_amount, price, 1);
    if withdraw_amount > after_deposit {
        assert!(result.is_err(), "withdrawal exceeding the deposited balance must be rejected");
    } else {
        let after_withdraw = result.unwrap();
        assert_eq!(after_withdraw, after_deposit - withdraw_amount);
    }

    let history = ledger.history("fuzz-player", None, crash_ledger::PageParams { offset: 0, limit: 10 });
    assert!(history.total >= 1, "at least the deposit must be recorded");
});
