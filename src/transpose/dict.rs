use hashbrown::HashMap;

use crate::error::{Error, Result};

/// Per-worker per-column dictionary assigning dense local ids in first-seen
/// order.
pub(super) struct LocalDict {
    map: HashMap<String, i32>,
}

impl LocalDict {
    pub(super) fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Returns the id for `token`, assigning the next dense id on first
    /// sight.
    ///
    /// # Errors
    ///
    /// Fails with `OutOfRange` if the dictionary outgrows the 32-bit id
    /// space.
    pub(super) fn intern(&mut self, token: String) -> Result<i32> {
        if let Some(&id) = self.map.get(&token) {
            return Ok(id);
        }
        let id = i32::try_from(self.map.len()).map_err(|_| Error::OutOfRange {
            index: self.map.len() as u64,
            details: "dictionary id exceeds the 32-bit id space".into(),
        })?;
        self.map.insert(token, id);
        Ok(id)
    }
}

/// One column's reconciled dictionary: the dense global enumeration plus a
/// per-worker local-id → global-id table.
pub(super) struct MergedColumn {
    /// Global id → token.
    pub(super) values: Vec<String>,
    pub(super) luts: Vec<Vec<i32>>,
}

/// Reconciles one column's local dictionaries into global ids.
///
/// Workers are visited in index order and each worker's keys in lexicographic
/// order, so the global enumeration is reproducible for a given
/// `(num_workers, input)` regardless of hash-map iteration order.
///
/// # Errors
///
/// Fails with `OutOfRange` if the union of local dictionaries outgrows the
/// 32-bit id space.
pub(super) fn merge_column(locals: Vec<LocalDict>) -> Result<MergedColumn> {
    let mut global: HashMap<String, i32> = HashMap::new();
    let mut values: Vec<String> = Vec::new();
    let mut luts = Vec::with_capacity(locals.len());

    for local in locals {
        let mut entries: Vec<(String, i32)> = local.map.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let mut lut = vec![0i32; entries.len()];
        for (token, local_id) in entries {
            let global_id = match global.get(&token) {
                Some(&id) => id,
                None => {
                    let id = i32::try_from(values.len()).map_err(|_| Error::OutOfRange {
                        index: values.len() as u64,
                        details: "global dictionary id exceeds the 32-bit id space".into(),
                    })?;
                    values.push(token.clone());
                    global.insert(token, id);
                    id
                }
            };
            lut[local_id as usize] = global_id;
        }
        luts.push(lut);
    }

    Ok(MergedColumn { values, luts })
}
