//! 金额与数据库整数单位之间的换算。
//!
//! 余额与费用以 1/10000 为单位存成 INTEGER，业务层统一使用 `Decimal`，从不使用浮点数。

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// 小数位数
pub const MONEY_SCALE: u32 = 4;
const UNITS_PER_WHOLE: i64 = 10_000;

/// 将金额换算为存储单位（超出四位小数的部分四舍五入）
pub fn to_units(amount: Decimal) -> Option<i64> {
    let rounded = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.checked_mul(Decimal::from(UNITS_PER_WHOLE))?.trunc().to_i64()
}

/// 将存储单位换算回金额
pub fn from_units(units: i64) -> Decimal {
    Decimal::new(units, MONEY_SCALE)
}
