//! Channel types and filename classification.
//!
//! Every file the recorder writes belongs to exactly one [`ChannelType`]. The
//! [`ChannelClassifier`] maps a basename to its type with an ordered list of
//! pattern rules; the first matching rule wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a monitored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelType {
    /// `*time.dat`: 4-byte sample indices, the size oracle for the session
    Timestamp,
    /// `amp*.dat`: 2-byte signed amplifier samples
    Amplifier,
    /// `stim*.dat`: 2-byte bit-packed stimulation words
    Stimulation,
    /// `board-DIGITAL-IN*.dat`: 2-byte digital input bitmasks
    DigitalInput,
    /// `*info.rhs`: header carrying the sample rate
    Metadata,
}

impl ChannelType {
    /// All channel types, in bucket order.
    pub const ALL: [ChannelType; 5] = [
        ChannelType::Timestamp,
        ChannelType::Amplifier,
        ChannelType::Stimulation,
        ChannelType::DigitalInput,
        ChannelType::Metadata,
    ];

    /// Width in bytes of one record, `None` for the metadata header.
    pub fn record_bytes(self) -> Option<usize> {
        match self {
            ChannelType::Timestamp => Some(4),
            ChannelType::Amplifier | ChannelType::Stimulation | ChannelType::DigitalInput => Some(2),
            ChannelType::Metadata => None,
        }
    }

    /// Position of this type in [`ChannelType::ALL`].
    pub fn index(self) -> usize {
        match self {
            ChannelType::Timestamp => 0,
            ChannelType::Amplifier => 1,
            ChannelType::Stimulation => 2,
            ChannelType::DigitalInput => 3,
            ChannelType::Metadata => 4,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelType::Timestamp => "timestamp",
            ChannelType::Amplifier => "amplifier",
            ChannelType::Stimulation => "stimulation",
            ChannelType::DigitalInput => "digital-input",
            ChannelType::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// A filename test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Basename contains the substring
    Contains(String),
    /// Basename starts with `prefix` and ends with `suffix`
    PrefixSuffix {
        /// Required prefix
        prefix: String,
        /// Required suffix
        suffix: String,
    },
}

impl Pattern {
    /// Shorthand for [`Pattern::Contains`].
    pub fn contains(needle: impl Into<String>) -> Self {
        Pattern::Contains(needle.into())
    }

    /// Shorthand for [`Pattern::PrefixSuffix`].
    pub fn prefix_suffix(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Pattern::PrefixSuffix {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    fn matches(&self, basename: &str) -> bool {
        match self {
            Pattern::Contains(needle) => basename.contains(needle.as_str()),
            Pattern::PrefixSuffix { prefix, suffix } => {
                basename.len() >= prefix.len() + suffix.len()
                    && basename.starts_with(prefix.as_str())
                    && basename.ends_with(suffix.as_str())
            }
        }
    }
}

/// One classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Filename test
    pub pattern: Pattern,
    /// Type assigned on match
    pub channel_type: ChannelType,
}

/// Maps basenames to channel types. Rules are fixed at construction.
#[derive(Debug, Clone)]
pub struct ChannelClassifier {
    rules: Vec<Rule>,
}

impl Default for ChannelClassifier {
    fn default() -> Self {
        Self::new(vec![
            Rule {
                pattern: Pattern::contains("time.dat"),
                channel_type: ChannelType::Timestamp,
            },
            Rule {
                pattern: Pattern::contains("info.rhs"),
                channel_type: ChannelType::Metadata,
            },
            Rule {
                pattern: Pattern::prefix_suffix("stim", ".dat"),
                channel_type: ChannelType::Stimulation,
            },
            Rule {
                pattern: Pattern::prefix_suffix("amp", ".dat"),
                channel_type: ChannelType::Amplifier,
            },
            Rule {
                pattern: Pattern::prefix_suffix("board-DIGITAL-IN", ".dat"),
                channel_type: ChannelType::DigitalInput,
            },
        ])
    }
}

impl ChannelClassifier {
    /// Build a classifier from an ordered rule list.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Classify a basename; first matching rule wins.
    pub fn classify(&self, basename: &str) -> Option<ChannelType> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(basename))
            .map(|rule| rule.channel_type)
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recorder_filenames() {
        let classifier = ChannelClassifier::default();
        assert_eq!(classifier.classify("time.dat"), Some(ChannelType::Timestamp));
        assert_eq!(classifier.classify("info.rhs"), Some(ChannelType::Metadata));
        assert_eq!(
            classifier.classify("amp-A-000.dat"),
            Some(ChannelType::Amplifier)
        );
        assert_eq!(
            classifier.classify("stim-B-002.dat"),
            Some(ChannelType::Stimulation)
        );
        assert_eq!(
            classifier.classify("board-DIGITAL-IN-01.dat"),
            Some(ChannelType::DigitalInput)
        );
    }

    #[test]
    fn unknown_files_are_none() {
        let classifier = ChannelClassifier::default();
        assert_eq!(classifier.classify("notes.txt"), None);
        assert_eq!(classifier.classify("amp-A-000.bin"), None);
        assert_eq!(classifier.classify("board-ANALOG-IN-01.dat"), None);
        assert_eq!(classifier.classify("vdd.dat"), None);
    }

    #[test]
    fn first_match_wins() {
        // "amp_time.dat" satisfies both the timestamp and amplifier rules
        let classifier = ChannelClassifier::default();
        assert_eq!(
            classifier.classify("amp_time.dat"),
            Some(ChannelType::Timestamp)
        );

        let reordered = ChannelClassifier::new(vec![
            Rule {
                pattern: Pattern::prefix_suffix("amp", ".dat"),
                channel_type: ChannelType::Amplifier,
            },
            Rule {
                pattern: Pattern::contains("time.dat"),
                channel_type: ChannelType::Timestamp,
            },
        ]);
        assert_eq!(
            reordered.classify("amp_time.dat"),
            Some(ChannelType::Amplifier)
        );
    }

    #[test]
    fn prefix_and_suffix_must_not_overlap() {
        let classifier = ChannelClassifier::new(vec![Rule {
            pattern: Pattern::prefix_suffix("stim", "im.dat"),
            channel_type: ChannelType::Stimulation,
        }]);
        assert_eq!(classifier.classify("stim.dat"), None);
        assert_eq!(
            classifier.classify("stim-im.dat"),
            Some(ChannelType::Stimulation)
        );
    }

    #[test]
    fn record_widths() {
        assert_eq!(ChannelType::Timestamp.record_bytes(), Some(4));
        assert_eq!(ChannelType::Amplifier.record_bytes(), Some(2));
        assert_eq!(ChannelType::Metadata.record_bytes(), None);
        for (i, ty) in ChannelType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
        }
    }
}
