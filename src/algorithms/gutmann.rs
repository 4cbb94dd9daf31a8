use super::{PassSpec, Pattern, SanitizationMethod};

/// The 35 passes from Gutmann's 1996 paper.
/// `None` is a random pass; passes 5-31 target MFM and RLL(2,7) encodings.
pub(crate) const GUTMANN_PATTERNS: [Option<&[u8]>; 35] = [
    None,
    None,
    None,
    None,
    Some(&[0x55]),
    Some(&[0xAA]),
    Some(&[0x92, 0x49, 0x24]),
    Some(&[0x49, 0x24, 0x92]),
    Some(&[0x24, 0x92, 0x49]),
    Some(&[0x00]),
    Some(&[0x11]),
    Some(&[0x22]),
    Some(&[0x33]),
    Some(&[0x44]),
    Some(&[0x55]),
    Some(&[0x66]),
    Some(&[0x77]),
    Some(&[0x88]),
    Some(&[0x99]),
    Some(&[0xAA]),
    Some(&[0xBB]),
    Some(&[0xCC]),
    Some(&[0xDD]),
    Some(&[0xEE]),
    Some(&[0xFF]),
    Some(&[0x92, 0x49, 0x24]),
    Some(&[0x49, 0x24, 0x92]),
    Some(&[0x24, 0x92, 0x49]),
    Some(&[0x6D, 0xB6, 0xDB]),
    Some(&[0xB6, 0xDB, 0x6D]),
    Some(&[0xDB, 0x6D, 0xB6]),
    None,
    None,
    None,
    None,
];

pub fn gutmann() -> SanitizationMethod {
    let last = GUTMANN_PATTERNS.len() - 1;
    let passes = GUTMANN_PATTERNS
        .iter()
        .enumerate()
        .map(|(i, pattern)| {
            let pattern = match *pattern {
                None => Pattern::Random,
                Some([0x00]) => Pattern::Zero,
                Some([0xFF]) => Pattern::One,
                Some(bytes) => Pattern::Fixed(bytes.to_vec()),
            };
            PassSpec {
                pattern,
                verify: i == last,
            }
        })
        .collect();

    SanitizationMethod::new("Gutmann", "Gutmann 35-pass", passes)
}
