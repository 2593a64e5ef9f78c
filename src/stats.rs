//! Statistics loader: reads a compact textual encoding of per-index
//! histograms into an in-memory `index_stat` the (external) planner
//! consults. Grounded on the `_sql_stat1`/`_sql_stat4` system spaces: a
//! `stat1`-style row is a total row count plus one average-rows-per-key-prefix
//! integer per key part, no samples; a `stat4`-style row additionally
//! carries up to `STAT4_SAMPLES` sampled keys, each with a running
//! `eq`/`lt`/`dlt` count vector. Keeping both row shapes rather than only the
//! sampled form keeps the planner-facing API honest about what a freshly
//! analyzed table versus a merely counted one actually provides.
//!
//! On a successful load the freshly built stats replace the previous ones
//! atomically per index (`installed` below); on failure the caller simply
//! never calls `install`, so the previous stats are left untouched.

use crate::collation::CollationRegistry;
use crate::keydef::KeyDef;
use crate::msgpack::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One sampled key from `_sql_stat4`: the encoded key plus, for each key
/// prefix length from 1 to the key's part count, the running counts the
/// planner uses to estimate selectivity.
#[derive(Debug, Clone)]
pub struct Stat4Sample {
    /// Pack-format-encoded key, one entry per key part.
    pub key: Vec<u8>,
    /// Number of rows equal to this sample's key, per prefix length.
    pub eq: Vec<u64>,
    /// Number of rows less than this sample's key, per prefix length.
    pub lt: Vec<u64>,
    /// Number of distinct keys less than this sample's key, per prefix length.
    pub dlt: Vec<u64>,
}

/// The shape of persisted statistics for one index: `stat1`'s plain
/// per-prefix averages, or `stat4`'s additional sampled rows. Kept as an
/// enum instead of always allocating the (possibly empty) sample vector so
/// a caller asking "does this index have samples at all" doesn't have to
/// guess from an empty `Vec`.
#[derive(Debug, Clone)]
pub enum IndexStat {
    Stat1 {
        row_count: u64,
        /// Average number of rows sharing each key prefix, one entry per
        /// key part (`avg_eq[0]` is field 1's average, and so on).
        avg_eq: Vec<u64>,
    },
    Stat4 {
        row_count: u64,
        avg_eq: Vec<u64>,
        samples: Vec<Stat4Sample>,
        /// `_index.opts.stat.unordered`: the index's physical order has no
        /// relationship to key order (e.g. a hash index), disabling
        /// range-scan cost estimates.
        unordered: bool,
        /// Disables skip-scan plans over this index's leading columns.
        no_skip_scan: bool,
    },
}

impl IndexStat {
    pub fn row_count(&self) -> u64 {
        match self {
            IndexStat::Stat1 { row_count, .. } | IndexStat::Stat4 { row_count, .. } => *row_count,
        }
    }

    pub fn samples(&self) -> &[Stat4Sample] {
        match self {
            IndexStat::Stat1 { .. } => &[],
            IndexStat::Stat4 { samples, .. } => samples,
        }
    }

    pub fn is_unordered(&self) -> bool {
        matches!(self, IndexStat::Stat4 { unordered: true, .. })
    }

    pub fn no_skip_scan(&self) -> bool {
        matches!(self, IndexStat::Stat4 { no_skip_scan: true, .. })
    }
}

/// One raw row as it would be read from `_sql_stat1`/`_sql_stat4`: `stat1`'s
/// single space-separated `stat` string (`"nRow avgEq1 avgEq2 ..."`), or a
/// `stat4` sample's already-typed fields.
#[derive(Debug, Clone)]
pub enum RawStatRow {
    Stat1 { index_name: String, stat: String },
    Stat4Sample {
        index_name: String,
        key: Vec<u8>,
        eq: Vec<u64>,
        lt: Vec<u64>,
        dlt: Vec<u64>,
    },
}

fn parse_stat1_text(stat: &str) -> Option<(u64, Vec<u64>)> {
    let mut it = stat.split_whitespace();
    let row_count = it.next()?.parse().ok()?;
    let avg_eq = it.map(|s| s.parse().ok()).collect::<Option<Vec<u64>>>()?;
    Some((row_count, avg_eq))
}

/// Populated, per-index stats. Distinct from [`Stats`]'s builder role:
/// queries against already-installed stats go through this type, installs
/// go through [`Stats::build`] + [`Stats::install`].
#[derive(Default)]
pub struct Stats {
    by_index: HashMap<String, IndexStat>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index_name: &str) -> Option<&IndexStat> {
        self.by_index.get(index_name)
    }

    /// Build a fresh stats map from `rows` without touching `self`. The
    /// caller installs the result only once every row decoded cleanly,
    /// matching "On success the loader installs the freshly-built stats
    /// atomically per index. On failure the previous stats remain in
    /// place."
    pub fn build(rows: &[RawStatRow]) -> Option<HashMap<String, IndexStat>> {
        let mut built: HashMap<String, IndexStat> = HashMap::new();
        for row in rows {
            match row {
                RawStatRow::Stat1 { index_name, stat } => {
                    let (row_count, avg_eq) = parse_stat1_text(stat)?;
                    built
                        .entry(index_name.clone())
                        .and_modify(|existing| {
                            if let IndexStat::Stat4 { row_count: rc, avg_eq: ae, .. } = existing {
                                *rc = row_count;
                                *ae = avg_eq.clone();
                            }
                        })
                        .or_insert(IndexStat::Stat1 { row_count, avg_eq });
                }
                RawStatRow::Stat4Sample { index_name, key, eq, lt, dlt } => {
                    let sample = Stat4Sample { key: key.clone(), eq: eq.clone(), lt: lt.clone(), dlt: dlt.clone() };
                    match built.get_mut(index_name) {
                        Some(IndexStat::Stat4 { samples, .. }) => samples.push(sample),
                        Some(IndexStat::Stat1 { row_count, avg_eq }) => {
                            let (row_count, avg_eq) = (*row_count, avg_eq.clone());
                            built.insert(
                                index_name.clone(),
                                IndexStat::Stat4 {
                                    row_count,
                                    avg_eq,
                                    samples: vec![sample],
                                    unordered: false,
                                    no_skip_scan: false,
                                },
                            );
                        }
                        None => {
                            built.insert(
                                index_name.clone(),
                                IndexStat::Stat4 {
                                    row_count: 0,
                                    avg_eq: Vec::new(),
                                    samples: vec![sample],
                                    unordered: false,
                                    no_skip_scan: false,
                                },
                            );
                        }
                    }
                }
            }
        }
        for stat in built.values_mut() {
            if let IndexStat::Stat4 { samples, .. } = stat {
                sort_samples(samples);
            }
        }
        Some(built)
    }

    /// Replace every index's stats with `built`, atomically per index.
    pub fn install(&mut self, built: HashMap<String, IndexStat>) {
        for (index_name, stat) in built {
            self.by_index.insert(index_name, stat);
        }
    }
}

/// Sort samples into key order, matching the order the rest of the engine's
/// comparator produces.
fn sort_samples(samples: &mut [Stat4Sample]) {
    samples.sort_by(|a, b| a.key.cmp(&b.key));
}

/// Sort `samples` by the index's actual key comparator, honoring collations
/// and sort order the way a plain byte-compare of the encoded key cannot.
/// Exposed separately from [`sort_samples`] (used as a cheap deterministic
/// fallback during `build`) because it needs a [`KeyDef`] and
/// [`CollationRegistry`] the loader may not have constructed yet.
pub fn sort_samples_by_key_def(
    samples: &mut Vec<Stat4Sample>,
    key_def: &KeyDef,
    collations: &CollationRegistry,
) -> crate::error::Result<()> {
    let mut keyed: Vec<(Stat4Sample, Value)> = Vec::with_capacity(samples.len());
    for s in samples.drain(..) {
        let (v, _) = crate::msgpack::decode(&s.key)
            .map_err(|e| crate::error::Error::client(crate::error::ClientErrorKind::InvalidMsgPack, e.to_string()))?;
        keyed.push((s, v));
    }
    keyed.sort_by(|(_, a), (_, b)| compare_key_arrays(a, b, key_def, collations));
    samples.extend(keyed.into_iter().map(|(s, _)| s));
    Ok(())
}

fn compare_key_arrays(a: &Value, b: &Value, key_def: &KeyDef, collations: &CollationRegistry) -> Ordering {
    let (Value::Array(a), Value::Array(b)) = (a, b) else {
        return Ordering::Equal;
    };
    for (i, part) in key_def.parts().iter().enumerate() {
        let (Some(av), Some(bv)) = (a.get(i), b.get(i)) else { break };
        let ord = if av.is_nil() || bv.is_nil() {
            match (av.is_nil(), bv.is_nil()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => unreachable!(),
            }
        } else {
            crate::keydef::compare_values(av, bv, part.collation, collations)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
