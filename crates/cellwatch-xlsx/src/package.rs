use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use zip::ZipArchive;

use crate::error::SnapshotError;

/// An opened workbook package: OPC part name → uncompressed bytes.
///
/// Part names are normalised to forward slashes without a leading `/`, so
/// lookups can use the canonical `xl/...` spelling regardless of how the
/// producer wrote the ZIP entries.
pub struct WorkbookArchive {
    parts: BTreeMap<String, Vec<u8>>,
}

impl WorkbookArchive {
    pub fn open(path: &Path) -> Result<Self, SnapshotError> {
        let file = File::open(path)
            .map_err(|e| SnapshotError::Archive(format!("{}: {e}", path.display())))?;
        let zip = ZipArchive::new(file)
            .map_err(|e| SnapshotError::Archive(format!("{}: {e}", path.display())))?;
        Self::read_zip(zip)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| SnapshotError::Archive(e.to_string()))?;
        Self::read_zip(zip)
    }

    fn read_zip<R: Read + Seek>(mut zip: ZipArchive<R>) -> Result<Self, SnapshotError> {
        let mut parts = BTreeMap::new();
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| SnapshotError::Archive(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = normalize_part_name(entry.name());
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut buf)
                .map_err(|e| SnapshotError::Archive(format!("read part {name}: {e}")))?;
            parts.insert(name, buf);
        }
        Ok(WorkbookArchive { parts })
    }

    /// Read a named part as bytes.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(|v| v.as_slice())
    }

    /// Read a named part as UTF-8 text.
    pub fn part_str(&self, name: &str) -> Result<Option<&str>, SnapshotError> {
        match self.parts.get(name) {
            Some(bytes) => Ok(Some(std::str::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }

    /// Part names matching a prefix, in lexicographic order.
    pub fn parts_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.parts
            .range(prefix.to_string()..)
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.as_str())
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(|k| k.as_str())
    }
}

fn normalize_part_name(name: &str) -> String {
    let name = name.replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            _ => out.push(segment),
        }
    }
    out.join("/")
}

/// Resolve a relationship target relative to the part that declared it.
pub(crate) fn resolve_target(base_part: &str, target: &str) -> String {
    let target = target.replace('\\', "/");
    if let Some(rest) = target.strip_prefix('/') {
        return normalize_part_name(rest);
    }

    let base_dir = base_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    let mut components: Vec<&str> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').collect()
    };

    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(segment),
        }
    }
    components.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_names_are_normalized() {
        assert_eq!(normalize_part_name("/xl/workbook.xml"), "xl/workbook.xml");
        assert_eq!(normalize_part_name("xl\\workbook.xml"), "xl/workbook.xml");
        assert_eq!(normalize_part_name("xl/./a/../workbook.xml"), "xl/workbook.xml");
    }

    #[test]
    fn relationship_targets_resolve_relative_to_base() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "../docProps/core.xml"),
            "docProps/core.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/media/image1.png"),
            "xl/media/image1.png"
        );
    }
}
