//! Semantic cell-level diffing between a stored baseline and a fresh snapshot.
//!
//! The differ never inspects cells when the content fingerprints already
//! match, filters the object-identity churn that array formulas used to cause
//! (equal formula text on both sides is never a change), and annotates
//! `[n]Name!` external references with the workbook paths they point at.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::debug;

use cellwatch_model::{
    fingerprint, parse_a1, Baseline, CellChange, CellEntry, CellModel, ExternalRefMap, Sheet,
};

/// Compute the cell-level changes from `stored` to `current`.
///
/// The returned order is deterministic (worksheet name, then row-major
/// coordinate) but is not part of the contract.
pub fn diff_cells(stored: &Baseline, current: &CellModel) -> Vec<CellChange> {
    // Fast path: identical fingerprints mean an empty diff by definition.
    if fingerprint(current) == stored.content_hash {
        debug!("content fingerprint unchanged, skipping cell comparison");
        return Vec::new();
    }

    let old_sheets = stored.cells.as_sorted_map();
    let new_sheets = current.as_sorted_map();

    let sheet_names: BTreeSet<&str> = old_sheets.keys().chain(new_sheets.keys()).copied().collect();

    static EMPTY: OnceLock<Sheet> = OnceLock::new();
    let empty = EMPTY.get_or_init(Sheet::new);

    let mut changes = Vec::new();
    for name in sheet_names {
        let old_cells = old_sheets.get(name).copied().unwrap_or(empty);
        let new_cells = new_sheets.get(name).copied().unwrap_or(empty);

        let mut coords: Vec<&str> = old_cells
            .keys()
            .chain(new_cells.keys())
            .map(|s| s.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        coords.sort_by_key(|label| parse_a1(label));

        for coord in coords {
            let old = old_cells.get(coord);
            let new = new_cells.get(coord);
            if let Some(change) = compare_cell(name, coord, old, new) {
                changes.push(change);
            }
        }
    }

    changes
}

/// Diff plus external-reference annotation of the surviving changes.
pub fn diff_report(
    stored: &Baseline,
    current: &CellModel,
    external_refs: &ExternalRefMap,
) -> Vec<CellChange> {
    let mut changes = diff_cells(stored, current);
    if !external_refs.is_empty() {
        for change in &mut changes {
            if let Some(formula) = change.old_formula.take() {
                change.old_formula = Some(annotate_external_refs(&formula, external_refs));
            }
            if let Some(formula) = change.new_formula.take() {
                change.new_formula = Some(annotate_external_refs(&formula, external_refs));
            }
        }
    }
    changes
}

fn compare_cell(
    worksheet: &str,
    coordinate: &str,
    old: Option<&CellEntry>,
    new: Option<&CellEntry>,
) -> Option<CellChange> {
    let old_formula = old.and_then(|e| e.formula.as_deref());
    let new_formula = new.and_then(|e| e.formula.as_deref());
    let old_value = old.and_then(CellEntry::value_text);
    let new_value = new.and_then(CellEntry::value_text);

    if old_formula == new_formula && old_value == new_value {
        return None;
    }

    // Two readings of the same stored formula must compare equal: when both
    // sides carry the same formula text, any residual value difference is a
    // calculation artifact, not a semantic edit.
    if let (Some(old_f), Some(new_f)) = (old_formula, new_formula) {
        if old_f == new_f {
            return None;
        }
    }

    Some(CellChange {
        worksheet: worksheet.to_string(),
        coordinate: coordinate.to_string(),
        old_formula: old_formula.map(str::to_string),
        old_value,
        new_formula: new_formula.map(str::to_string),
        new_value,
    })
}

/// Rewrite `[n]Name!` tokens with the workbook path behind index `n`.
///
/// `=[1]Data!A1` becomes `=[external1: source.xlsx]Data!A1` when the map has
/// an entry for 1; unmapped indices pass through untouched. Idempotent on
/// formulas without such tokens.
pub fn annotate_external_refs(formula: &str, external_refs: &ExternalRefMap) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| Regex::new(r"\[(\d+)\]([^\[\]!]+)!").expect("valid pattern"));

    token
        .replace_all(formula, |caps: &Captures<'_>| {
            let index: u32 = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => return caps[0].to_string(),
            };
            match external_refs.get(&index) {
                Some(href) => format!("[external{index}: {href}]{}!", &caps[2]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
