use primitive_types::U256;

pub const NANO_AVAX: u64 = 1;
pub const MICRO_AVAX: u64 = 1000 * NANO_AVAX;
pub const MILLI_AVAX: u64 = 1000 * MICRO_AVAX;

/// On the P-Chain, one AVAX is 10^9 units.
pub const AVAX: u64 = 1000 * MILLI_AVAX;

/// On the C-Chain (and most L1 EVMs), one native token is 10^18 units.
pub const EVM_DECIMALS: usize = 18;

/// Renders a P-Chain nAVAX amount as a decimal AVAX string (e.g., "1.5").
pub fn format_navax(navax: u64) -> String {
    let whole = navax / AVAX;
    let frac = navax % AVAX;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:09}", frac);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Renders an 18-decimal EVM amount as a decimal string.
pub fn format_wei(wei: U256) -> String {
    let base = U256::exp10(EVM_DECIMALS);
    let whole = wei / base;
    let frac = wei % base;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = EVM_DECIMALS);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- units::test_format --exact --show-output
#[test]
fn test_format() {
    assert_eq!(format_navax(0), "0");
    assert_eq!(format_navax(AVAX), "1");
    assert_eq!(format_navax(1_500_000_000), "1.5");
    assert_eq!(format_navax(1), "0.000000001");

    assert_eq!(format_wei(U256::exp10(18)), "1");
    assert_eq!(format_wei(U256::from(25) * U256::exp10(17)), "2.5");
}
