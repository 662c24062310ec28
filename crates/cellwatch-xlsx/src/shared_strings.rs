use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::SnapshotError;

/// Parse `xl/sharedStrings.xml` into the flat string table.
///
/// Rich-text runs are concatenated to their visible text. Phonetic guide runs
/// (`<rPh>`) are not part of the displayed string and are skipped.
pub(crate) fn parse_shared_strings(xml: &str) -> Result<Vec<String>, SnapshotError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut items = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                items.push(parse_si(&mut reader)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                items.push(String::new());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

fn parse_si(reader: &mut Reader<&[u8]>) -> Result<String, SnapshotError> {
    read_text_runs(reader, b"si")
}

/// Concatenate the `<t>` runs of a string container (`<si>` or `<is>`) up to
/// its closing tag, skipping phonetic subtrees.
pub(crate) fn read_text_runs(
    reader: &mut Reader<&[u8]>,
    end_tag: &[u8],
) -> Result<String, SnapshotError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_t = true,
            Event::End(e) if e.local_name().as_ref() == b"t" => in_t = false,
            Event::Empty(e) if e.local_name().as_ref() == b"t" => {}
            Event::Start(e) if e.local_name().as_ref() == b"rPh" => {
                // Phonetic run: skip the whole subtree.
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::Text(t) if in_t => text.push_str(&t.unescape()?),
            Event::End(e) if e.local_name().as_ref() == end_tag => break,
            Event::Eof => {
                return Err(SnapshotError::Invalid(format!(
                    "unexpected eof inside <{}>",
                    String::from_utf8_lossy(end_tag)
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}
