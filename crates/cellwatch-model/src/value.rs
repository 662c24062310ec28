use serde::{Deserialize, Serialize};

/// A cell's stored scalar value.
///
/// Timestamps are carried as ISO-8601 [`CellScalar::Text`]; the coercion
/// happens at extraction time so that fingerprinting and diffing only ever see
/// plain scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellScalar {
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
}

impl CellScalar {
    /// The string form used for value comparison and audit records.
    pub fn to_display_string(&self) -> String {
        match self {
            CellScalar::Bool(b) => b.to_string(),
            CellScalar::Int(i) => i.to_string(),
            CellScalar::Number(n) => n.to_string(),
            CellScalar::Text(s) => s.clone(),
        }
    }

    /// Parse a raw `<v>` payload of a numeric cell.
    ///
    /// Integral values are kept exact as [`CellScalar::Int`]; everything else
    /// falls back to `f64`.
    pub fn from_numeric_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(i) = text.parse::<i64>() {
            return Some(CellScalar::Int(i));
        }
        text.parse::<f64>().ok().map(CellScalar::Number)
    }
}

impl From<&str> for CellScalar {
    fn from(s: &str) -> Self {
        CellScalar::Text(s.to_string())
    }
}

impl From<String> for CellScalar {
    fn from(s: String) -> Self {
        CellScalar::Text(s)
    }
}

impl From<i64> for CellScalar {
    fn from(i: i64) -> Self {
        CellScalar::Int(i)
    }
}

impl From<f64> for CellScalar {
    fn from(n: f64) -> Self {
        CellScalar::Number(n)
    }
}

impl From<bool> for CellScalar {
    fn from(b: bool) -> Self {
        CellScalar::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_text_keeps_integers_exact() {
        assert_eq!(CellScalar::from_numeric_text("42"), Some(CellScalar::Int(42)));
        assert_eq!(
            CellScalar::from_numeric_text("-7"),
            Some(CellScalar::Int(-7))
        );
        assert_eq!(
            CellScalar::from_numeric_text("3.25"),
            Some(CellScalar::Number(3.25))
        );
        assert_eq!(CellScalar::from_numeric_text("abc"), None);
    }

    #[test]
    fn untagged_serde_round_trips_bare_scalars() {
        let json = serde_json::to_string(&CellScalar::Int(5)).unwrap();
        assert_eq!(json, "5");
        let back: CellScalar = serde_json::from_str("5").unwrap();
        assert_eq!(back, CellScalar::Int(5));

        let json = serde_json::to_string(&CellScalar::Text("hello".into())).unwrap();
        assert_eq!(json, "\"hello\"");

        let back: CellScalar = serde_json::from_str("true").unwrap();
        assert_eq!(back, CellScalar::Bool(true));
    }
}
