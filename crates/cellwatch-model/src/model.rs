use std::collections::BTreeMap;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::CellScalar;

/// Coordinate label (`A1`, `BC27`) → stored cell content.
pub type Sheet = BTreeMap<String, CellEntry>;

/// External-link index (`[n]` in formula text) → referenced workbook path.
pub type ExternalRefMap = BTreeMap<u32, String>;

/// A cell's stored content: formula text and/or a scalar value.
///
/// A missing component is absent, not empty-string. Cells where both
/// components are absent are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellEntry {
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub value: Option<CellScalar>,
}

impl CellEntry {
    pub fn formula(text: impl Into<String>) -> Self {
        CellEntry {
            formula: Some(text.into()),
            value: None,
        }
    }

    pub fn value(value: impl Into<CellScalar>) -> Self {
        CellEntry {
            formula: None,
            value: Some(value.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.formula.is_none() && self.value.is_none()
    }

    /// String form of the value component, used for change comparison.
    pub fn value_text(&self) -> Option<String> {
        self.value.as_ref().map(CellScalar::to_display_string)
    }
}

/// One worksheet's non-empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Worksheet {
    pub name: String,
    pub cells: Sheet,
}

/// Normalised cell content of an entire workbook.
///
/// Worksheets keep the order they were read in (useful for reporting), but
/// order does not participate in equality or fingerprinting.
#[derive(Debug, Clone, Default)]
pub struct CellModel {
    sheets: Vec<Worksheet>,
}

impl CellModel {
    pub fn new() -> Self {
        CellModel::default()
    }

    /// Append a worksheet. Empty sheets are dropped, matching the extraction
    /// policy of omitting cells without content.
    pub fn push_sheet(&mut self, name: impl Into<String>, cells: Sheet) {
        if cells.is_empty() {
            return;
        }
        self.sheets.push(Worksheet {
            name: name.into(),
            cells,
        });
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|ws| ws.name == name).map(|ws| &ws.cells)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|ws| ws.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worksheet> {
        self.sheets.iter()
    }

    pub fn worksheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(|ws| ws.cells.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// Name-keyed view, used for order-insensitive comparison and for the
    /// canonical fingerprint serialisation.
    pub fn as_sorted_map(&self) -> BTreeMap<&str, &Sheet> {
        self.sheets
            .iter()
            .map(|ws| (ws.name.as_str(), &ws.cells))
            .collect()
    }
}

impl PartialEq for CellModel {
    fn eq(&self, other: &Self) -> bool {
        self.as_sorted_map() == other.as_sorted_map()
    }
}

impl Serialize for CellModel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sheets.len()))?;
        for ws in &self.sheets {
            map.serialize_entry(&ws.name, &ws.cells)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CellModel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModelVisitor;

        impl<'de> Visitor<'de> for ModelVisitor {
            type Value = CellModel;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of worksheet name to cells")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut model = CellModel::new();
                while let Some((name, cells)) = access.next_entry::<String, Sheet>()? {
                    model.push_sheet(name, cells);
                }
                Ok(model)
            }
        }

        deserializer.deserialize_map(ModelVisitor)
    }
}

/// The persisted last-known content of a watched document.
///
/// `content_hash` is always the fingerprint of `cells`. Baselines are keyed by
/// the document's *basename*: two watched documents sharing a basename collide
/// on the same baseline file and the last writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default)]
    pub last_author: Option<String>,
    pub content_hash: String,
    pub cells: CellModel,
}

impl Baseline {
    pub fn new(last_author: Option<String>, cells: CellModel) -> Self {
        let content_hash = crate::fingerprint(&cells);
        Baseline {
            last_author,
            content_hash,
            cells,
        }
    }
}

/// One semantic cell-level difference between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub worksheet: String,
    pub coordinate: String,
    pub old_formula: Option<String>,
    pub old_value: Option<String>,
    pub new_formula: Option<String>,
    pub new_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sheet(entries: &[(&str, CellEntry)]) -> Sheet {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn sheet_order_is_preserved_but_not_semantic() {
        let cells = sheet(&[("A1", CellEntry::value("x"))]);

        let mut forward = CellModel::new();
        forward.push_sheet("First", cells.clone());
        forward.push_sheet("Second", cells.clone());

        let mut reverse = CellModel::new();
        reverse.push_sheet("Second", cells.clone());
        reverse.push_sheet("First", cells);

        let forward_names: Vec<_> = forward.sheet_names().collect();
        assert_eq!(forward_names, vec!["First", "Second"]);

        assert_eq!(forward, reverse);
    }

    #[test]
    fn empty_sheets_are_dropped() {
        let mut model = CellModel::new();
        model.push_sheet("Empty", Sheet::new());
        assert!(model.is_empty());
    }

    #[test]
    fn cell_entry_serializes_both_components() {
        let entry = CellEntry::value("hello");
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"formula":null,"value":"hello"}"#);

        let entry = CellEntry::formula("=SUM(A1:A3)");
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"formula":"=SUM(A1:A3)","value":null}"#);
    }

    #[test]
    fn model_round_trips_through_json() {
        let mut model = CellModel::new();
        model.push_sheet(
            "Sheet1",
            sheet(&[
                ("A1", CellEntry::value("hello")),
                ("B2", CellEntry::formula("=A1")),
            ]),
        );

        let json = serde_json::to_string(&model).unwrap();
        let back: CellModel = serde_json::from_str(&json).unwrap();
        assert_eq!(model, back);
    }

    #[test]
    fn baseline_hash_matches_cells() {
        let mut model = CellModel::new();
        model.push_sheet("Sheet1", sheet(&[("A1", CellEntry::value(1i64))]));
        let baseline = Baseline::new(Some("alice".into()), model.clone());
        assert_eq!(baseline.content_hash, crate::fingerprint(&model));
    }
}
