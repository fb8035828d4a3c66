//! Canonicalization of feature IDs across labels.
//!
//! A feature such as "word=Paris" is conjoined with a label assignment to become a
//! concrete feature ID. The map records, for every ID, which ID the same feature
//! receives under any other labeled clique.

use core::num::NonZeroU32;
use std::sync::{PoisonError, RwLock};

use alloc::vec::Vec;

use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use hashbrown::HashMap;

use crate::clique::{Clique, LabeledClique};
use crate::errors::{CliqueError, Result};

#[derive(Clone, Debug, Default)]
struct OpenTable {
    // feature ID -> equivalence class
    class_of: HashMap<usize, usize>,
    // `None` marks a counterpart removed by pruning
    classes: Vec<HashMap<LabeledClique, Option<usize>>>,
}

impl OpenTable {
    fn add(&mut self, orig: usize, lc: LabeledClique, new: Option<usize>) {
        let class = match (
            self.class_of.get(&orig).copied(),
            new.and_then(|new| self.class_of.get(&new).copied()),
        ) {
            (Some(a), Some(b)) if a != b => self.merge(a, b),
            (Some(a), _) => a,
            (None, Some(b)) => b,
            (None, None) => {
                self.classes.push(HashMap::new());
                self.classes.len() - 1
            }
        };
        self.class_of.insert(orig, class);
        if let Some(new) = new {
            self.class_of.insert(new, class);
        }
        self.classes[class].insert(lc, new);
    }

    // Moves every entry of class `b` into class `a`.
    fn merge(&mut self, a: usize, b: usize) -> usize {
        let moved = core::mem::take(&mut self.classes[b]);
        self.classes[a].extend(moved);
        for class in self.class_of.values_mut() {
            if *class == b {
                *class = a;
            }
        }
        a
    }

    fn get(&self, orig: usize, lc: &LabeledClique) -> Option<Option<usize>> {
        let class = *self.class_of.get(&orig)?;
        self.classes[class].get(lc).copied()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Cell {
    #[default]
    Empty,
    Pruned,
    Feature(NonZeroU32),
}

impl Cell {
    // `None` if the ID does not fit a cell.
    #[inline(always)]
    fn from_entry(entry: Option<usize>) -> Option<Self> {
        match entry {
            Some(id) => u32::try_from(id)
                .ok()
                .filter(|&id| id < u32::MAX - 1)
                .and_then(|id| NonZeroU32::new(id + 1))
                .map(Self::Feature),
            None => Some(Self::Pruned),
        }
    }

    #[inline(always)]
    fn entry(self) -> Option<Option<usize>> {
        match self {
            Self::Empty => None,
            Self::Pruned => Some(None),
            Self::Feature(id) => Some(Some(id.get() as usize - 1)),
        }
    }

    // 0 is empty, 1 is pruned, `id + 2` is a feature.
    fn to_u32(self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Pruned => 1,
            Self::Feature(id) => id.get() + 1,
        }
    }

    fn from_u32(raw: u32) -> Self {
        match raw {
            0 => Self::Empty,
            1 => Self::Pruned,
            raw => NonZeroU32::new(raw - 1).map_or(Self::Empty, Self::Feature),
        }
    }
}

#[derive(Debug)]
struct FrozenTable {
    max_clique: Clique,
    base: usize,
    num_rows: usize,
    width: usize,
    cells: RwLock<Vec<Cell>>,
}

impl FrozenTable {
    /// Mixed-radix code of `lc` over the maximum clique: digit 0 marks an absent
    /// offset, `label + 1` a present one.
    fn code(&self, lc: &LabeledClique) -> Option<usize> {
        if !lc.clique().is_subset_of(&self.max_clique) {
            return None;
        }
        let mut code = 0;
        let mut scale = 1;
        for &offset in self.max_clique.offsets() {
            let digit = match lc.label_at(offset) {
                Some(label) if label + 1 < self.base => label + 1,
                Some(_) => return None,
                None => 0,
            };
            code += digit * scale;
            scale *= self.base;
        }
        Some(code)
    }

    #[inline(always)]
    fn cell(&self, orig: usize, code: usize) -> Option<usize> {
        (orig < self.num_rows).then(|| orig * self.width + code)
    }

    fn store(&self, completed: Vec<(usize, Cell)>) {
        if completed.is_empty() {
            return;
        }
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        for (cell, value) in completed {
            cells[cell] = value;
        }
    }
}

impl Clone for FrozenTable {
    fn clone(&self) -> Self {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        Self {
            max_clique: self.max_clique.clone(),
            base: self.base,
            num_rows: self.num_rows,
            width: self.width,
            cells: RwLock::new(cells.clone()),
        }
    }
}

#[derive(Clone, Debug)]
enum State {
    Open(OpenTable),
    Frozen(FrozenTable),
}

/// Maps `(feature ID, labeled clique)` to the ID of the same feature under that
/// labeled clique.
///
/// The map starts open and is frozen once the corpus is built. An open map fails on
/// unknown pairs. A frozen map completes unknown pairs lazily with a caller-supplied
/// synthesizer and stores the result when it fits the frozen table.
///
/// Lookups return `None` for a counterpart removed by feature pruning.
#[derive(Clone, Debug)]
pub struct FeatureMap {
    state: State,
}

impl Default for FeatureMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureMap {
    /// Creates a new open map.
    pub fn new() -> Self {
        Self {
            state: State::Open(OpenTable::default()),
        }
    }

    /// Returns `true` once [`FeatureMap::freeze`] has been called.
    pub fn is_frozen(&self) -> bool {
        matches!(self.state, State::Frozen(_))
    }

    /// Records that feature `orig` becomes feature `new` under `lc`.
    ///
    /// The entry is reachable from both `orig` and `new`.
    ///
    /// # Errors
    ///
    /// On a frozen map, `orig` and `lc` must fall inside the frozen table.
    pub fn add(&mut self, orig: usize, lc: LabeledClique, new: usize) -> Result<()> {
        self.insert(orig, lc, Some(new))
    }

    /// Records that feature `orig` has no counterpart under `lc` because it was
    /// pruned.
    pub(crate) fn add_pruned(&mut self, orig: usize, lc: LabeledClique) -> Result<()> {
        self.insert(orig, lc, None)
    }

    fn insert(&mut self, orig: usize, lc: LabeledClique, new: Option<usize>) -> Result<()> {
        match &mut self.state {
            State::Open(table) => {
                table.add(orig, lc, new);
                Ok(())
            }
            State::Frozen(table) => {
                let code = table.code(&lc).ok_or(CliqueError::FrozenBounds {
                    feature: orig,
                    code: usize::MAX,
                })?;
                let cell = table
                    .cell(orig, code)
                    .ok_or(CliqueError::FrozenBounds { feature: orig, code })?;
                let value = Cell::from_entry(new)
                    .ok_or_else(|| CliqueError::invalid_argument("feature ID too large"))?;
                let mirror = new.and_then(|new| table.cell(new, code));
                let cells = table.cells.get_mut().unwrap_or_else(PoisonError::into_inner);
                cells[cell] = value;
                if let Some(mirror) = mirror {
                    cells[mirror] = value;
                }
                Ok(())
            }
        }
    }

    fn miss(orig: usize, lc: &LabeledClique) -> CliqueError {
        CliqueError::lookup_miss(format!("feature {orig} has no entry for {lc}"))
    }

    /// Looks up the ID of feature `orig` under `lc`, or `None` if it was pruned.
    ///
    /// # Errors
    ///
    /// On an open map, a missing entry is a [`CliqueError::LookupMiss`]. On a frozen
    /// map, a missing entry is resolved by `synthesize`, whose errors are forwarded.
    pub fn get_feature<F>(
        &self,
        orig: usize,
        lc: &LabeledClique,
        synthesize: F,
    ) -> Result<Option<usize>>
    where
        F: FnOnce() -> Result<Option<usize>>,
    {
        match &self.state {
            State::Open(table) => table.get(orig, lc).ok_or_else(|| Self::miss(orig, lc)),
            State::Frozen(table) => {
                let cell = table.code(lc).and_then(|code| table.cell(orig, code));
                if let Some(cell) = cell {
                    let cells = table.cells.read().unwrap_or_else(PoisonError::into_inner);
                    if let Some(entry) = cells[cell].entry() {
                        return Ok(entry);
                    }
                }
                let entry = synthesize()?;
                if let Some(value) = cell.zip(Cell::from_entry(entry)) {
                    table.store(vec![value]);
                }
                Ok(entry)
            }
        }
    }

    /// Maps every ID of `origs` to its counterpart under `lc`.
    ///
    /// # Errors
    ///
    /// See [`FeatureMap::get_feature`].
    pub fn get_feature_array<F>(
        &self,
        origs: &[usize],
        lc: &LabeledClique,
        mut synthesize: F,
    ) -> Result<Vec<Option<usize>>>
    where
        F: FnMut(usize) -> Result<Option<usize>>,
    {
        match &self.state {
            State::Open(table) => origs
                .iter()
                .map(|&orig| table.get(orig, lc).ok_or_else(|| Self::miss(orig, lc)))
                .collect(),
            State::Frozen(table) => {
                let code = table.code(lc);
                let mut result = Vec::with_capacity(origs.len());
                let mut misses = vec![];
                {
                    let cells = table.cells.read().unwrap_or_else(PoisonError::into_inner);
                    for (i, &orig) in origs.iter().enumerate() {
                        let hit = code
                            .and_then(|code| table.cell(orig, code))
                            .and_then(|cell| cells[cell].entry());
                        match hit {
                            Some(entry) => result.push(entry),
                            None => {
                                result.push(None);
                                misses.push(i);
                            }
                        }
                    }
                }
                let mut completed = vec![];
                for i in misses {
                    let entry = synthesize(origs[i])?;
                    result[i] = entry;
                    let cell = code.and_then(|code| table.cell(origs[i], code));
                    if let Some(value) = cell.zip(Cell::from_entry(entry)) {
                        completed.push(value);
                    }
                }
                table.store(completed);
                Ok(result)
            }
        }
    }

    /// Switches to the dense representation. Freezing a frozen map does nothing.
    ///
    /// # Errors
    ///
    /// The dense table must be addressable.
    pub fn freeze(&mut self, num_features: usize, max_clique: &Clique, num_labels: usize) -> Result<()> {
        let State::Open(open) = &self.state else {
            return Ok(());
        };
        let base = num_labels + 1;
        let width = u32::try_from(max_clique.len())
            .ok()
            .and_then(|exp| base.checked_pow(exp))
            .ok_or_else(|| CliqueError::invalid_argument("too many label combinations to freeze"))?;
        let num_rows = open
            .class_of
            .keys()
            .map(|&fid| fid + 1)
            .max()
            .unwrap_or(0)
            .max(num_features);
        let size = num_rows
            .checked_mul(width)
            .ok_or_else(|| CliqueError::invalid_argument("feature map too large to freeze"))?;
        let mut table = FrozenTable {
            max_clique: max_clique.clone(),
            base,
            num_rows,
            width,
            cells: RwLock::new(vec![]),
        };
        let mut cells = vec![Cell::Empty; size];
        for (&fid, &class) in &open.class_of {
            for (lc, &entry) in &open.classes[class] {
                if let Some(cell) = table.code(lc).and_then(|code| table.cell(fid, code)) {
                    cells[cell] = Cell::from_entry(entry).unwrap_or_default();
                }
            }
        }
        log::debug!("froze feature map: {num_rows} rows x {width} label codes");
        table.cells = RwLock::new(cells);
        self.state = State::Frozen(table);
        Ok(())
    }

    /// Renumbers every feature ID.
    ///
    /// Rows of IDs mapped to `None` are dropped; entries pointing at them become
    /// pruned markers, so lookups skip them instead of failing or synthesizing.
    pub(crate) fn remap(&mut self, mapping: &[Option<usize>]) {
        let new_id = |id: usize| mapping.get(id).copied().flatten();
        match &mut self.state {
            State::Open(table) => {
                let class_of: HashMap<usize, usize> = table
                    .class_of
                    .iter()
                    .filter_map(|(&fid, &class)| new_id(fid).map(|fid| (fid, class)))
                    .collect();
                for class in &mut table.classes {
                    for entry in class.values_mut() {
                        *entry = entry.and_then(new_id);
                    }
                }
                table.class_of = class_of;
            }
            State::Frozen(table) => {
                let num_rows = mapping.iter().flatten().count();
                let old = table.cells.get_mut().unwrap_or_else(PoisonError::into_inner);
                let mut cells = vec![Cell::Empty; num_rows * table.width];
                for fid in 0..table.num_rows {
                    let Some(row) = new_id(fid) else {
                        continue;
                    };
                    for code in 0..table.width {
                        cells[row * table.width + code] = match old[fid * table.width + code] {
                            Cell::Empty => Cell::Empty,
                            cell => cell
                                .entry()
                                .flatten()
                                .and_then(new_id)
                                .and_then(|id| Cell::from_entry(Some(id)))
                                .unwrap_or(Cell::Pruned),
                        };
                    }
                }
                table.num_rows = num_rows;
                table.cells = RwLock::new(cells);
            }
        }
    }
}

impl<Context> Decode<Context> for FeatureMap {
    #[allow(clippy::type_complexity)]
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let frozen: bool = Decode::decode(decoder)?;
        let state = if frozen {
            let max_clique: Clique = Decode::decode(decoder)?;
            let base: usize = Decode::decode(decoder)?;
            let num_rows: usize = Decode::decode(decoder)?;
            let raw: Vec<u32> = Decode::decode(decoder)?;
            let width = u32::try_from(max_clique.len())
                .ok()
                .and_then(|exp| base.checked_pow(exp))
                .ok_or(DecodeError::Other("feature map table is not addressable"))?;
            if num_rows.checked_mul(width) != Some(raw.len()) {
                return Err(DecodeError::Other("feature map table has a wrong size"));
            }
            State::Frozen(FrozenTable {
                max_clique,
                base,
                num_rows,
                width,
                cells: RwLock::new(raw.into_iter().map(Cell::from_u32).collect()),
            })
        } else {
            let class_of: Vec<(usize, usize)> = Decode::decode(decoder)?;
            let classes: Vec<Vec<(LabeledClique, Option<usize>)>> = Decode::decode(decoder)?;
            if class_of.iter().any(|&(_, class)| class >= classes.len()) {
                return Err(DecodeError::Other("feature map class out of range"));
            }
            State::Open(OpenTable {
                class_of: class_of.into_iter().collect(),
                classes: classes
                    .into_iter()
                    .map(|class| class.into_iter().collect())
                    .collect(),
            })
        };
        Ok(Self { state })
    }
}

bincode::impl_borrow_decode!(FeatureMap);

impl Encode for FeatureMap {
    #[allow(clippy::type_complexity)]
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        match &self.state {
            State::Frozen(table) => {
                let cells = table.cells.read().unwrap_or_else(PoisonError::into_inner);
                let raw: Vec<u32> = cells.iter().map(|cell| cell.to_u32()).collect();
                Encode::encode(&true, encoder)?;
                Encode::encode(&table.max_clique, encoder)?;
                Encode::encode(&table.base, encoder)?;
                Encode::encode(&table.num_rows, encoder)?;
                Encode::encode(&raw, encoder)?;
            }
            State::Open(table) => {
                let mut class_of: Vec<(usize, usize)> =
                    table.class_of.iter().map(|(&k, &v)| (k, v)).collect();
                class_of.sort_unstable();
                let classes: Vec<Vec<(LabeledClique, Option<usize>)>> = table
                    .classes
                    .iter()
                    .map(|class| class.iter().map(|(lc, &id)| (lc.clone(), id)).collect())
                    .collect();
                Encode::encode(&false, encoder)?;
                Encode::encode(&class_of, encoder)?;
                Encode::encode(&classes, encoder)?;
            }
        }
        Ok(())
    }
}
