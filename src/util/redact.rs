//! Address redaction for log hygiene (§7: "addresses are redacted to
//! `0xAAAA...BBBB` form").

use std::fmt;

pub struct Redacted<'a>(pub &'a str);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.len() <= 10 {
            return write!(f, "{s}");
        }
        write!(f, "{}…{}", &s[..6], &s[s.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_long_address() {
        let addr = "0x1234567890abcdef1234567890abcdef12345678";
        assert_eq!(Redacted(addr).to_string(), "0x1234…5678");
    }

    #[test]
    fn leaves_short_strings_alone() {
        assert_eq!(Redacted("0x00").to_string(), "0x00");
    }
}
