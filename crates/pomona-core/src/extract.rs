//! Streaming extraction of indicator records from catalog XML.
//!
//! [`CatalogReader`] pulls parser events from any [`BufRead`] and yields one
//! [`CatalogItem`] per `<indicator>` element. Only the fields of the item being
//! read are buffered, so memory stays proportional to the largest item and not
//! to the document.
//!
//! Recognized layout (all sub-elements optional):
//!
//! ```xml
//! <catalog>
//!   <language>PT</language>
//!   <extraction_date>2024-05-01</extraction_date>
//!   <indicator id="0008074">
//!     <title>Taxa de desemprego</title>
//!     <description>...</description>
//!     <keywords>emprego; desemprego</keywords>
//!     <theme>Mercado de trabalho</theme>
//!     <subtheme>Desemprego</subtheme>
//!     <periodicity>Trimestral</periodicity>
//!     <dates><last_update>01-02-2024</last_update></dates>
//!     <html><bdd_url>...</bdd_url><metainfo_url>...</metainfo_url></html>
//!     <json><json_dataset>...</json_dataset><json_metainfo>...</json_metainfo></json>
//!   </indicator>
//! </catalog>
//! ```

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::AppError;
use crate::models::{CatalogContext, CatalogItem, EnrichmentSet, IndicatorFields, ResourceRef};
use crate::normalize::{normalize_tag, normalize_url_slashes, split_keywords};

const ITEM_ELEMENT: &str = "indicator";

/// Resource sub-elements, in output order: (parent, leaf, title, format).
const RESOURCE_ELEMENTS: [(&str, &str, &str, &str); 4] = [
    ("html", "bdd_url", "Página do indicador (HTML)", "html"),
    ("html", "metainfo_url", "Metainformação (HTML)", "html"),
    ("json", "json_dataset", "Dados do indicador (JSON)", "json"),
    ("json", "json_metainfo", "Metainformação (JSON)", "json"),
];

// =============================================================================
// Decoding helpers
// =============================================================================

/// Decodes raw bytes as UTF-8, falling back to Latin-1.
fn decode_bytes(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Decodes and unescapes text content. A malformed entity keeps the raw text.
fn decode_text(bytes: &[u8]) -> String {
    let raw = decode_bytes(bytes);
    match quick_xml::escape::unescape(&raw) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.into_owned(),
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    decode_bytes(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| decode_text(&attr.value).trim().to_string())
}

/// Consumes bytes up to the first `<`, dropping a BOM or leading garbage.
fn skip_preamble<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let (found, used) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'<') {
                Some(pos) => (true, pos),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

fn set_first(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

// =============================================================================
// Per-item accumulation
// =============================================================================

#[derive(Default)]
struct ItemBuilder {
    remote_id: String,
    /// Element names below the `<indicator>` element.
    path: Vec<String>,
    /// Direct text of the innermost open element.
    text: String,
    /// Direct text of the enclosing elements, parked while a child is open.
    outer_text: Vec<String>,
    title: Option<String>,
    description: Option<String>,
    keywords: Vec<String>,
    themes: Vec<String>,
    resource_urls: [Option<String>; 4],
    fields: IndicatorFields,
}

impl ItemBuilder {
    fn new(remote_id: String) -> Self {
        Self {
            remote_id,
            ..Default::default()
        }
    }

    fn assign(&mut self, value: &str) {
        let depth = self.path.len();
        let Some(leaf) = self.path.last().map(String::as_str) else {
            return;
        };
        let parent = depth.checked_sub(2).map(|i| self.path[i].as_str());

        match (parent, leaf) {
            (None, "title") => set_first(&mut self.title, value),
            (None, "description") => set_first(&mut self.description, value),
            (_, "keywords") if !value.is_empty() => self.keywords.push(value.to_string()),
            (_, "theme" | "subtheme") if !value.is_empty() => self.themes.push(value.to_string()),
            (_, "periodicity") => set_first(&mut self.fields.periodicity, value),
            (_, "last_update") => set_first(&mut self.fields.last_update, value),
            (_, "last_period_available") => {
                set_first(&mut self.fields.last_period_available, value)
            }
            (_, "varcd") => set_first(&mut self.fields.varcd, value),
            (_, "update_type") => set_first(&mut self.fields.update_type, value),
            (_, "source") => set_first(&mut self.fields.source, value),
            (_, "geo_lastlevel") => set_first(&mut self.fields.geo_lastlevel, value),
            (Some(parent), leaf) => {
                if let Some(idx) = RESOURCE_ELEMENTS
                    .iter()
                    .position(|(p, l, _, _)| *p == parent && *l == leaf)
                {
                    set_first(&mut self.resource_urls[idx], value);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> CatalogItem {
        let mut tags = BTreeSet::new();
        for keywords in &self.keywords {
            tags.extend(split_keywords(keywords));
        }
        for theme in &self.themes {
            let tag = normalize_tag(theme);
            if !tag.is_empty() {
                tags.insert(tag);
            }
        }

        let resources = RESOURCE_ELEMENTS
            .iter()
            .zip(self.resource_urls)
            .filter_map(|((_, _, title, format), url)| {
                let url = normalize_url_slashes(&url?);
                (!url.is_empty()).then(|| ResourceRef::new(url, *title, *format))
            })
            .collect();

        CatalogItem {
            remote_id: self.remote_id,
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            tags,
            resources,
            fields: self.fields,
        }
    }
}

#[derive(Clone, Copy)]
enum ContextField {
    Language,
    ExtractionDate,
}

/// Parser state kept apart from the reader so event borrows stay disjoint.
#[derive(Default)]
struct ExtractState {
    current: Option<ItemBuilder>,
    context: CatalogContext,
    capture: Option<ContextField>,
    capture_text: String,
}

impl ExtractState {
    fn on_start(&mut self, e: &BytesStart<'_>) {
        let name = local_name(e);
        if let Some(item) = self.current.as_mut() {
            item.path.push(name);
            let outer = std::mem::take(&mut item.text);
            item.outer_text.push(outer);
            return;
        }
        if name == ITEM_ELEMENT {
            self.current = Some(ItemBuilder::new(attribute(e, b"id").unwrap_or_default()));
            return;
        }
        self.capture = match name.as_str() {
            "language" if self.context.language.is_none() => Some(ContextField::Language),
            "extraction_date" if self.context.extraction_date.is_none() => {
                Some(ContextField::ExtractionDate)
            }
            _ => None,
        };
        self.capture_text.clear();
    }

    fn on_empty(&mut self, e: &BytesStart<'_>) -> Option<CatalogItem> {
        if self.current.is_none() && local_name(e) == ITEM_ELEMENT {
            let id = attribute(e, b"id").unwrap_or_default();
            return Some(ItemBuilder::new(id).finish());
        }
        None
    }

    fn on_text(&mut self, text: &str) {
        if let Some(item) = self.current.as_mut() {
            if !item.path.is_empty() {
                item.text.push_str(text);
            }
        } else if self.capture.is_some() {
            self.capture_text.push_str(text);
        }
    }

    fn on_end(&mut self) -> Option<CatalogItem> {
        let closes_item = matches!(&self.current, Some(item) if item.path.is_empty());
        if closes_item {
            return self.current.take().map(ItemBuilder::finish);
        }
        if let Some(item) = self.current.as_mut() {
            let value = std::mem::take(&mut item.text);
            item.assign(value.trim());
            item.path.pop();
            item.text = item.outer_text.pop().unwrap_or_default();
            return None;
        }
        if let Some(field) = self.capture.take() {
            let value = self.capture_text.trim();
            if !value.is_empty() {
                let slot = match field {
                    ContextField::Language => &mut self.context.language,
                    ContextField::ExtractionDate => &mut self.context.extraction_date,
                };
                set_first(slot, value);
            }
        }
        None
    }
}

// =============================================================================
// Catalog reader
// =============================================================================

/// Lazy, single-pass iterator over the indicators of a catalog document.
///
/// A structural XML error ends the sequence: the reader yields one
/// [`AppError::ParseError`] and then `None`. Damaged or missing sub-fields
/// degrade to empty values instead.
pub struct CatalogReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    state: ExtractState,
    items_read: usize,
    finished: bool,
}

impl<R: BufRead> CatalogReader<R> {
    /// Wraps `input`, skipping any bytes before the first `<`.
    pub fn new(mut input: R) -> Result<Self, AppError> {
        skip_preamble(&mut input)?;
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(false);

        Ok(Self {
            reader,
            buf: Vec::with_capacity(4096),
            state: ExtractState::default(),
            items_read: 0,
            finished: false,
        })
    }

    /// Catalog-wide values seen so far.
    pub fn context(&self) -> &CatalogContext {
        &self.state.context
    }

    /// Number of items yielded so far.
    pub fn items_read(&self) -> usize {
        self.items_read
    }

    fn parse_error(&self, cause: impl std::fmt::Display) -> AppError {
        let location = match &self.state.current {
            Some(item) if !item.remote_id.is_empty() => format!("inside indicator {}", item.remote_id),
            Some(_) => "inside an indicator without id".to_string(),
            None if self.items_read == 0 => "before the first indicator".to_string(),
            None => format!("after {} indicators", self.items_read),
        };
        AppError::ParseError(format!(
            "malformed catalog XML at byte {} ({}): {}",
            self.reader.buffer_position(),
            location,
            cause
        ))
    }

    fn emit(&mut self, item: CatalogItem) -> Option<Result<CatalogItem, AppError>> {
        self.items_read += 1;
        Some(Ok(item))
    }
}

impl<R: BufRead> Iterator for CatalogReader<R> {
    type Item = Result<CatalogItem, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(self.parse_error(e)));
                }
            };

            let completed = match event {
                Event::Start(e) => {
                    self.state.on_start(&e);
                    None
                }
                Event::Empty(e) => self.state.on_empty(&e),
                Event::Text(text) => {
                    self.state.on_text(&decode_text(&text));
                    None
                }
                Event::CData(data) => {
                    self.state.on_text(&decode_bytes(&data));
                    None
                }
                Event::End(_) => self.state.on_end(),
                Event::Eof => {
                    self.finished = true;
                    if self.state.current.is_some() {
                        return Some(Err(self.parse_error("document ended before </indicator>")));
                    }
                    return None;
                }
                _ => None,
            };

            if let Some(item) = completed {
                return self.emit(item);
            }
        }
    }
}

// =============================================================================
// Single documents
// =============================================================================

/// Extracts one indicator from a small per-item detail document.
///
/// Returns the indicator whose id equals `remote_id`, otherwise the first one
/// in the document (re-keyed to `remote_id`), together with the document's own
/// catalog context.
pub fn extract_item(bytes: &[u8], remote_id: &str) -> Result<(CatalogItem, CatalogContext), AppError> {
    let mut reader = CatalogReader::new(bytes)?;
    let mut first = None;

    while let Some(result) = reader.next() {
        let item = result?;
        if item.remote_id == remote_id {
            return Ok((item, reader.context().clone()));
        }
        if first.is_none() {
            first = Some(item);
        }
    }

    match first {
        Some(mut item) => {
            tracing::debug!(
                requested = remote_id,
                found = %item.remote_id,
                "Detail document has no matching indicator, using the first one"
            );
            item.remote_id = remote_id.to_string();
            Ok((item, reader.context().clone()))
        }
        None => Err(AppError::ParseError(format!(
            "no indicator found in detail document for {}",
            remote_id
        ))),
    }
}

/// Reads an id list: `id` attributes of `<indicator>` elements and the text
/// of `<id>` elements.
pub fn read_id_list<R: BufRead>(mut input: R) -> Result<EnrichmentSet, AppError> {
    skip_preamble(&mut input)?;
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut ids: Vec<String> = Vec::new();
    let mut in_id = false;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == ITEM_ELEMENT {
                    ids.extend(attribute(&e, b"id"));
                } else if name == "id" {
                    in_id = true;
                    text.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                if local_name(&e) == ITEM_ELEMENT {
                    ids.extend(attribute(&e, b"id"));
                }
            }
            Ok(Event::Text(t)) if in_id => text.push_str(&decode_text(&t)),
            Ok(Event::CData(c)) if in_id => text.push_str(&decode_bytes(&c)),
            Ok(Event::End(e)) => {
                if in_id && e.local_name().as_ref() == b"id" {
                    ids.push(text.trim().to_string());
                    in_id = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AppError::ParseError(format!(
                    "malformed id list at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(ids.into_iter().collect())
}
