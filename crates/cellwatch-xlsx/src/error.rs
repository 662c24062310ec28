use thiserror::Error;

/// Coarse classification used by the control plane's status accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The package could not be opened or is not a readable ZIP.
    Archive,
    /// The package opened but cell extraction failed.
    Read,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot open workbook package: {0}")]
    Archive(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("xml error: {0}")]
    RoXml(#[from] roxmltree::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("missing workbook part: {0}")]
    MissingPart(String),
    #[error("invalid workbook: {0}")]
    Invalid(String),
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::Archive(_) => ErrorKind::Archive,
            _ => ErrorKind::Read,
        }
    }
}
