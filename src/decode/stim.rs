//! Stimulation word layout.
//!
//! ```text
//!  15   14   13   12..9   8      7..0
//! [CL] [CR] [AS] [----] [sign] [magnitude]
//! ```
//!
//! Current is `magnitude * step * (-1 if sign else +1)`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

const MAGNITUDE_MASK: u16 = 0x00FF;
const SIGN_BIT: u16 = 0x0100;

bitflags! {
    /// Status bits carried alongside each stimulation sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StimFlags: u16 {
        /// Amplifier settle active
        const AMP_SETTLE = 1 << 13;
        /// Charge recovery active
        const CHARGE_RECOVERY = 1 << 14;
        /// Compliance limit reached
        const COMPLIANCE_LIMIT = 1 << 15;
    }
}

/// One raw 16-bit stimulation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimWord(pub u16);

impl StimWord {
    /// Assemble a word from its fields.
    pub fn from_parts(magnitude: u8, negative: bool, flags: StimFlags) -> Self {
        let sign = if negative { SIGN_BIT } else { 0 };
        StimWord(u16::from(magnitude) | sign | flags.bits())
    }

    /// Unsigned magnitude, bits 0..7.
    pub fn magnitude(self) -> u8 {
        (self.0 & MAGNITUDE_MASK) as u8
    }

    /// Bit 8.
    pub fn is_negative(self) -> bool {
        self.0 & SIGN_BIT != 0
    }

    /// Status bits 13..15; unused bits 9..12 are dropped.
    pub fn flags(self) -> StimFlags {
        StimFlags::from_bits_truncate(self.0)
    }

    /// Signed current for the given step size.
    pub fn current(self, step_size: f64) -> f64 {
        let sign = if self.is_negative() { -1.0 } else { 1.0 };
        f64::from(self.magnitude()) * step_size * sign
    }
}

/// Decoded stimulation block: currents plus per-sample flags, same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StimDecoded {
    /// Signed current per sample
    pub current: Vec<f64>,
    /// Status bits per sample
    pub flags: Vec<StimFlags>,
}

impl StimDecoded {
    /// Decode raw words.
    pub fn from_words(words: &[u16], step_size: f64) -> Self {
        let mut out = StimDecoded {
            current: Vec::with_capacity(words.len()),
            flags: Vec::with_capacity(words.len()),
        };
        for &raw in words {
            let word = StimWord(raw);
            out.current.push(word.current(step_size));
            out.flags.push(word.flags());
        }
        out
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Per-sample compliance-limit indicator.
    pub fn compliance_limit(&self) -> Vec<bool> {
        self.flag_series(StimFlags::COMPLIANCE_LIMIT)
    }

    /// Per-sample charge-recovery indicator.
    pub fn charge_recovery(&self) -> Vec<bool> {
        self.flag_series(StimFlags::CHARGE_RECOVERY)
    }

    /// Per-sample amp-settle indicator.
    pub fn amp_settle(&self) -> Vec<bool> {
        self.flag_series(StimFlags::AMP_SETTLE)
    }

    fn flag_series(&self, flag: StimFlags) -> Vec<bool> {
        self.flags.iter().map(|f| f.contains(flag)).collect()
    }

    /// Append another block.
    pub fn extend(&mut self, other: StimDecoded) {
        self.current.extend(other.current);
        self.flags.extend(other.flags);
    }
}
