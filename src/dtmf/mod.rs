//! DTMF codec pair (C4): a Goertzel filter-bank detector and a two-tone
//! phase-accumulator generator. Standard telephony keypad signalling,
//! sum-of-two-sines per digit.

pub mod detector;
pub mod generator;

pub use detector::{DtmfDetector, DtmfEvent};
pub use generator::DtmfGenerator;

/// Row frequencies (Hz) of the DTMF keypad matrix.
pub const LOW_GROUP_HZ: [f32; 4] = [697.0, 770.0, 852.0, 941.0];
/// Column frequencies (Hz) of the DTMF keypad matrix.
pub const HIGH_GROUP_HZ: [f32; 4] = [1209.0, 1336.0, 1477.0, 1633.0];

/// The 16 standard DTMF digits, indexed `[low_idx][high_idx]`.
pub const DIGIT_MATRIX: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

/// Looks up the digit character for a given digit. Used by the generator to
/// find the row/column frequency pair for a requested digit.
pub fn digit_frequencies(digit: char) -> Option<(f32, f32)> {
    for (low_idx, row) in DIGIT_MATRIX.iter().enumerate() {
        for (high_idx, &d) in row.iter().enumerate() {
            if d == digit.to_ascii_uppercase() {
                return Some((LOW_GROUP_HZ[low_idx], HIGH_GROUP_HZ[high_idx]));
            }
        }
    }
    None
}
