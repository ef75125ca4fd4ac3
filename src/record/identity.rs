use sha2::{Digest, Sha256};

use crate::record::InterviewRecord;

pub const SLOT_KEY_LEN: usize = 17;
pub const HOUSEHOLD_KEY_LEN: usize = 13;

const STATE_WIDTH: usize = 2;
const HOUSEHOLD_WIDTH: usize = 9;
const VISIT_WIDTH: usize = 2;
const INTERVIEW_WIDTH: usize = 2;
const ORDER_WIDTH: usize = 2;

pub fn slot_key(record: &InterviewRecord) -> String {
    let mut key = household_key(record);
    key.push_str(&fixed_width_number(u64::from(record.interview), INTERVIEW_WIDTH));
    key.push_str(&fixed_width_number(u64::from(record.order), ORDER_WIDTH));
    key
}

pub fn household_key(record: &InterviewRecord) -> String {
    let mut key = String::with_capacity(HOUSEHOLD_KEY_LEN);
    key.push_str(&fixed_width_text(&record.state, STATE_WIDTH));
    key.push_str(&fixed_width_text(&record.household, HOUSEHOLD_WIDTH));
    key.push_str(&fixed_width_number(u64::from(record.visit), VISIT_WIDTH));
    key
}

pub fn person_id(group_id: &str, sex: &str, birth_date: &str, disambiguator: u32) -> String {
    sha256_hex(&format!("{group_id}\x1f{sex}\x1f{birth_date}\x1f{disambiguator}"))
}

fn fixed_width_text(raw: &str, width: usize) -> String {
    let digits = raw.trim();
    // Counted in chars: codes are not guaranteed ASCII.
    let count = digits.chars().count();
    if count >= width {
        digits.chars().skip(count - width).collect()
    } else {
        format!("{digits:0>width$}")
    }
}

fn fixed_width_number(value: u64, width: usize) -> String {
    fixed_width_text(&value.to_string(), width)
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
