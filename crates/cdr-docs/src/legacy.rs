//! The legacy `CdrDoc` representation of a document.
//!
//! ```text
//! <CdrDoc Type="Term" Id="CDR0000000042">
//!   <CdrDocCtl>
//!     <DocTitle readonly="yes">...</DocTitle>
//!     ...
//!   </CdrDocCtl>
//!   <CdrDocXml><![CDATA[...]]></CdrDocXml>
//!   <CdrDocBlob encoding="base64">...</CdrDocBlob>
//! </CdrDoc>
//! ```

use base64::{engine::general_purpose, Engine as _};

use crate::doc::{xml_date, Doc};
use crate::error::{DocError, DocResult};
use crate::xml::{Element, Node};

/// Produces the denormalized form of a document's XML.
///
/// Implemented by the filter engine, which runs the denormalization
/// filters.
pub trait Denormalizer {
    /// Returns the denormalized XML for `doc`.
    fn denormalize(&self, doc: &Doc) -> DocResult<String>;
}

/// Options for [`Doc::legacy_document`].
#[derive(Clone, Copy, Default)]
pub struct LegacyOptions<'a> {
    /// Include the `CdrDocXml` block.
    pub get_xml: bool,
    /// Include the `CdrDocBlob` block when the version has a blob.
    pub get_blob: bool,
    /// Use denormalized XML in `CdrDocXml`.
    pub denormalizer: Option<&'a dyn Denormalizer>,
    /// Build the control block in filtering mode.
    pub filtering: bool,
}

impl<'a> LegacyOptions<'a> {
    /// Default options: control block only, read-only mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Includes the document XML.
    pub fn with_xml(mut self) -> Self {
        self.get_xml = true;
        self
    }

    /// Includes the blob.
    pub fn with_blob(mut self) -> Self {
        self.get_blob = true;
        self
    }

    /// Includes denormalized rather than raw XML.
    pub fn denormalized(mut self, denormalizer: &'a dyn Denormalizer) -> Self {
        self.get_xml = true;
        self.denormalizer = Some(denormalizer);
        self
    }

    /// Builds the control block in filtering mode.
    pub fn filtering(mut self) -> Self {
        self.filtering = true;
        self
    }
}

fn base64_lines(bytes: &[u8]) -> String {
    let encoded = general_purpose::STANDARD.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 + 1);
    for chunk in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out
}

fn dated(tag: &str, date: Option<String>) -> Element {
    let mut element = Element::new(tag);
    if let Some(date) = date {
        element.push_text(date);
    }
    element
}

impl Doc {
    /// Denormalized XML, computed once per XML value.
    pub fn denormalized_xml(&self, denormalizer: &dyn Denormalizer) -> DocResult<&str> {
        self.denormalized
            .get_or_try_init(|| denormalizer.denormalize(self))
            .map(String::as_str)
    }

    /// Builds the `CdrDoc` element.
    pub fn legacy_document(&self, opts: LegacyOptions<'_>) -> DocResult<Element> {
        let cdr_id = self.cdr_id().ok_or(DocError::MissingDocumentId)?;
        let mut cdr_doc = Element::new("CdrDoc")
            .with_attr("Type", self.doctype()?)
            .with_attr("Id", cdr_id)
            .with_child(self.legacy_doc_control(opts.filtering)?);
        if opts.get_xml {
            let xml = match opts.denormalizer {
                Some(denormalizer) => self.denormalized_xml(denormalizer)?,
                None => self.xml()?,
            };
            let mut wrapper = Element::new("CdrDocXml");
            wrapper.children.push(Node::CData(xml.to_string()));
            cdr_doc.push_element(wrapper);
        }
        if opts.get_blob {
            if let Some(blob) = self.blob()? {
                cdr_doc.push_element(
                    Element::new("CdrDocBlob")
                        .with_attr("encoding", "base64")
                        .with_text(base64_lines(blob)),
                );
            }
        }
        Ok(cdr_doc)
    }

    /// Builds the `CdrDocCtl` element.
    ///
    /// In filtering mode the block gains `Create`, `Modify` and (once
    /// published) `FirstPub` children; otherwise every child is marked
    /// read-only.
    pub fn legacy_doc_control(&self, filtering: bool) -> DocResult<Element> {
        let modified = xml_date(self.modified()?);
        let val_date = xml_date(self.val_date()?);
        let version = self.version()?.map(|v| v.to_string());
        let ready = if self.ready_for_review()? { Some("Y") } else { None };

        let control_info: [(&str, Option<String>); 9] = [
            ("DocTitle", self.title()?.map(str::to_string)),
            ("DocActiveStatus", self.active_status()?.map(str::to_string)),
            ("DocValStatus", self.val_status()?.map(str::to_string)),
            ("DocValDate", val_date),
            ("DocVersion", version),
            ("DocModified", modified.clone()),
            ("DocModifier", self.modifier()?.map(str::to_string)),
            ("DocComment", self.comment()?.map(str::to_string)),
            ("ReadyForReview", ready.map(str::to_string)),
        ];

        let mut control = Element::new("CdrDocCtl");
        for (tag, value) in control_info {
            let value = match value {
                Some(value) if !value.is_empty() => value,
                _ => continue,
            };
            let mut child = Element::new(tag).with_text(value);
            if !filtering {
                child.set_attr("readonly", "yes");
            }
            if tag == "DocVersion" {
                let publishable = self.publishable()?.unwrap_or(false);
                child.set_attr("Publishable", if publishable { "Y" } else { "N" });
            }
            control.push_element(child);
        }

        if filtering {
            let mut user = Element::new("User");
            if let Some(creator) = self.creator()? {
                user.push_text(creator);
            }
            control.push_element(
                Element::new("Create")
                    .with_child(dated("Date", xml_date(self.created()?)))
                    .with_child(user),
            );
            let mut user = Element::new("User");
            if let Some(modifier) = self.modifier()? {
                user.push_text(modifier);
            }
            control.push_element(
                Element::new("Modify")
                    .with_child(dated("Date", modified))
                    .with_child(user),
            );
            if let Some(first_pub) = xml_date(self.first_pub()?) {
                control.push_element(
                    Element::new("FirstPub").with_child(dated("Date", Some(first_pub))),
                );
            }
        }
        Ok(control)
    }
}
