//! Named/id-addressed locale-aware string collators.
//!
//! Key comparators dispatch string parts through this layer instead of
//! comparing bytes directly, so a key part can be declared with a collation
//! id that changes how two strings order relative to each other without
//! touching the comparator that walks the key.

use std::cmp::Ordering;
use std::collections::HashMap;

pub type CollationId = u32;

/// How much of a string's identity a collator takes into account. Mirrors
/// ICU's collation strengths, which is also the vocabulary `analyze.c`'s
/// callers use when they talk about collations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    /// Base letters only: "a" == "\u{e1}" == "A".
    Primary,
    /// Base letters + diacritics: "a" != "\u{e1}", "a" == "A".
    Secondary,
    /// + case: "a" != "A".
    Tertiary,
    /// + punctuation sensitivity.
    Quaternary,
    /// Byte-identical only.
    Identical,
}

pub trait Collation: Send + Sync {
    fn name(&self) -> &str;
    fn strength(&self) -> Strength;
    fn compare(&self, s1: &str, s2: &str) -> Ordering;
}

struct Unicode {
    name: &'static str,
    strength: Strength,
}

impl Collation for Unicode {
    fn name(&self) -> &str {
        self.name
    }

    fn strength(&self) -> Strength {
        self.strength
    }

    fn compare(&self, s1: &str, s2: &str) -> Ordering {
        match self.strength {
            Strength::Identical | Strength::Quaternary => s1.cmp(s2),
            Strength::Tertiary => s1.cmp(s2),
            Strength::Secondary => {
                // Case-insensitive, diacritic-sensitive: compare case-folded
                // code points directly (no full Unicode normalization).
                let mut a = s1.chars().flat_map(char::to_lowercase);
                let mut b = s2.chars().flat_map(char::to_lowercase);
                loop {
                    match (a.next(), b.next()) {
                        (Some(x), Some(y)) => match x.cmp(&y) {
                            Ordering::Equal => continue,
                            other => return other,
                        },
                        (None, None) => return Ordering::Equal,
                        (None, Some(_)) => return Ordering::Less,
                        (Some(_), None) => return Ordering::Greater,
                    }
                }
            }
            Strength::Primary => {
                // Case- and diacritic-insensitive: drop combining marks,
                // then case-fold.
                let strip = |s: &str| -> String {
                    s.chars()
                        .filter(|c| !is_combining_mark(*c))
                        .flat_map(char::to_lowercase)
                        .collect()
                };
                strip(s1).cmp(&strip(s2))
            }
        }
    }
}

/// A conservative approximation of the Unicode combining-mark ranges,
/// sufficient for primary-strength collation of accented Latin text.
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF)
}

struct Binary;

impl Collation for Binary {
    fn name(&self) -> &str {
        "binary"
    }

    fn strength(&self) -> Strength {
        Strength::Identical
    }

    fn compare(&self, s1: &str, s2: &str) -> Ordering {
        s1.as_bytes().cmp(s2.as_bytes())
    }
}

/// Interns collations by name and assigns them compact ids.
pub struct CollationRegistry {
    by_id: Vec<Box<dyn Collation>>,
    by_name: HashMap<String, CollationId>,
}

impl Default for CollationRegistry {
    fn default() -> Self {
        let mut reg = Self {
            by_id: Vec::new(),
            by_name: HashMap::new(),
        };
        reg.register(Box::new(Binary));
        reg.register(Box::new(Unicode {
            name: "unicode",
            strength: Strength::Tertiary,
        }));
        reg.register(Box::new(Unicode {
            name: "unicode_ci",
            strength: Strength::Secondary,
        }));
        reg.register(Box::new(Unicode {
            name: "unicode_ci_ai",
            strength: Strength::Primary,
        }));
        reg
    }
}

impl CollationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collation: Box<dyn Collation>) -> CollationId {
        let id = self.by_id.len() as CollationId;
        self.by_name.insert(collation.name().to_owned(), id);
        self.by_id.push(collation);
        id
    }

    pub fn lookup(&self, id: CollationId) -> Option<&dyn Collation> {
        self.by_id.get(id as usize).map(|b| b.as_ref())
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<CollationId> {
        self.by_name.get(name).copied()
    }
}
