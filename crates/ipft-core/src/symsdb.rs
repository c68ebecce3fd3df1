//! # Symbol Database
//!
//! Accumulates what the resolver learns about the kernel:
//!
//! - `sym2info`: function name → [`SymInfo`] (which parameter is the `sk_buff *`)
//! - `mark_offset`: byte offset of `mark` inside `struct sk_buff`, shared by
//!   every function
//!
//! Names are copied into owned `String`s so the records outlive the debug-info
//! source they were read from.
//!
//! ## Thread Safety
//!
//! The resolver runs on one thread; the database has no internal locking.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::debug;

use crate::config::DEFAULT_MAX_PARAM_POSITION;
use crate::error::{IpftError, Result};

/// Per-function information recorded by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymInfo
{
    /// 1-based position of the `sk_buff *` parameter
    pub skb_pos: usize,
}

impl SymInfo
{
    #[must_use]
    pub fn new(skb_pos: usize) -> Self
    {
        Self { skb_pos }
    }
}

/// Function records plus the single discovered mark offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymsDb
{
    sym2info: HashMap<String, SymInfo>,
    mark_offset: Option<u64>,
    max_skb_pos: usize,
}

impl Default for SymsDb
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SymsDb
{
    /// Empty database accepting positions `1..=4`.
    #[must_use]
    pub fn new() -> Self
    {
        Self::with_max_param_position(DEFAULT_MAX_PARAM_POSITION)
    }

    /// Empty database accepting positions `1..=max`.
    #[must_use]
    pub fn with_max_param_position(max: usize) -> Self
    {
        Self {
            sym2info: HashMap::new(),
            mark_offset: None,
            max_skb_pos: max,
        }
    }

    /// Insert a record unless the name is already known.
    ///
    /// Returns `Ok(true)` when the record was stored and `Ok(false)` when an
    /// earlier record for `name` was kept. Duplicates are expected: static
    /// helpers with the same name live in many compilation units.
    ///
    /// ## Errors
    ///
    /// [`IpftError::InvalidRecord`] for an empty name or a position outside
    /// `1..=max_param_position`.
    pub fn put_sym2info(&mut self, name: &str, info: SymInfo) -> Result<bool>
    {
        if name.is_empty() {
            return Err(IpftError::InvalidRecord("function name is empty".to_string()));
        }
        if info.skb_pos == 0 || info.skb_pos > self.max_skb_pos {
            return Err(IpftError::InvalidRecord(format!(
                "{name}: skb position {} outside 1..={}",
                info.skb_pos, self.max_skb_pos
            )));
        }

        match self.sym2info.entry(name.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(info);
                Ok(true)
            }
        }
    }

    /// Empty database with the same limit and mark offset as `self`.
    ///
    /// The resolver fills one per compilation unit and [`merge`](Self::merge)s
    /// it back only if the whole unit decoded.
    #[must_use]
    pub fn staging(&self) -> Self
    {
        Self {
            sym2info: HashMap::new(),
            mark_offset: self.mark_offset,
            max_skb_pos: self.max_skb_pos,
        }
    }

    /// Fold `staged` into `self`, keeping existing records on name clashes.
    ///
    /// Returns the number of new records.
    ///
    /// ## Errors
    ///
    /// - [`IpftError::MarkOffsetConflict`] if both sides carry different offsets
    /// - [`IpftError::InvalidRecord`] if `staged` holds a position `self` does not accept
    pub fn merge(&mut self, staged: SymsDb) -> Result<usize>
    {
        if let Some(offset) = staged.mark_offset {
            self.put_mark_offset(offset)?;
        }

        let mut added = 0;
        for (name, info) in staged.sym2info {
            if info.skb_pos == 0 || info.skb_pos > self.max_skb_pos {
                return Err(IpftError::InvalidRecord(format!(
                    "{name}: skb position {} outside 1..={}",
                    info.skb_pos, self.max_skb_pos
                )));
            }
            match self.sym2info.entry(name) {
                Entry::Occupied(existing) => {
                    if *existing.get() != info {
                        debug!(
                            function = %existing.key(),
                            kept = existing.get().skb_pos,
                            ignored = info.skb_pos,
                            "duplicate function with a different skb position"
                        );
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(info);
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    #[must_use]
    pub fn get_sym2info(&self, name: &str) -> Option<SymInfo>
    {
        self.sym2info.get(name).copied()
    }

    #[must_use]
    pub fn mark_offset(&self) -> Option<u64>
    {
        self.mark_offset
    }

    /// Record the mark offset.
    ///
    /// The first value sticks. Storing the same value again is a no-op.
    ///
    /// ## Errors
    ///
    /// [`IpftError::MarkOffsetConflict`] when a different offset was stored before.
    pub fn put_mark_offset(&mut self, offset: u64) -> Result<()>
    {
        match self.mark_offset {
            None => {
                self.mark_offset = Some(offset);
                Ok(())
            }
            Some(existing) if existing == offset => Ok(()),
            Some(existing) => Err(IpftError::MarkOffsetConflict {
                existing,
                discovered: offset,
            }),
        }
    }

    #[must_use]
    pub fn max_param_position(&self) -> usize
    {
        self.max_skb_pos
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.sym2info.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.sym2info.is_empty()
    }

    /// All records, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SymInfo)>
    {
        self.sym2info.iter().map(|(name, info)| (name.as_str(), *info))
    }

    /// All records sorted by function name.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&str, SymInfo)>
    {
        let mut records: Vec<_> = self.iter().collect();
        records.sort_unstable_by(|a, b| a.0.cmp(b.0));
        records
    }
}
