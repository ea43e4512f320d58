use crate::types::MarketType;

/// Strip a recognized exchange prefix from an A-share symbol.
///
/// Only the domestic-equity market uses prefixed symbols (`sh600795`,
/// `SZ000001`); every other market type passes through unchanged. Pure and
/// total: there is no failure case.
pub fn normalize_symbol<'a>(code: &'a str, market: &MarketType) -> &'a str {
    if *market != MarketType::A {
        return code;
    }
    // Compare on bytes: the code is free-form user input and may start
    // with a multibyte character, so a string slice at 2 could panic.
    let bytes = code.as_bytes();
    if bytes.len() >= 2
        && bytes[0].eq_ignore_ascii_case(&b's')
        && (bytes[1].eq_ignore_ascii_case(&b'h') || bytes[1].eq_ignore_ascii_case(&b'z'))
    {
        // Both prefix bytes are ASCII, so index 2 is a char boundary.
        return &code[2..];
    }
    code
}
