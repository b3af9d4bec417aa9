//! Add-in `Manifest.xml` parser.
//!
//! A dazip carries one manifest listing the add-ins (and optionally offers)
//! it installs:
//!
//! ```xml
//! <Manifest Type="AddIn">
//!   <AddInsList>
//!     <AddInItem UID="demo" Name="Demo" ExtendedModuleUID="DAO_PRC_CP_2"
//!                Version="1.0" GameVersion="1.0.1008.0" Priority="200">
//!       <Title><DefaultText>Demo &amp; friends</DefaultText></Title>
//!     </AddInItem>
//!   </AddInsList>
//! </Manifest>
//! ```
//!
//! Manifests written by the official toolset are usually UTF-16 with a BOM;
//! quick-xml only reads UTF-8, so the bytes are transcoded with encoding_rs
//! first.

use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

/// Errors from decoding or parsing a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid {encoding}")]
    Encoding { encoding: &'static str },

    #[error("malformed manifest XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("document has no <Manifest> root element")]
    MissingRoot,
}

/// One `AddInItem` or `OfferItem`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddInItem {
    pub uid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_module_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// `Title/DefaultText`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    /// The root's `Type` attribute (`AddIn`, `Offer`, ...).
    pub kind: String,
    pub add_ins: Vec<AddInItem>,
    pub offers: Vec<AddInItem>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.add_ins.is_empty() && self.offers.is_empty()
    }

    /// UIDs of every item, add-ins first.
    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.add_ins
            .iter()
            .chain(&self.offers)
            .map(|item| item.uid.as_str())
    }
}

/// Transcode manifest bytes to UTF-8, honouring a UTF-8 or UTF-16 BOM.
pub fn decode_manifest_bytes(bytes: &[u8]) -> Result<String, ManifestError> {
    let (encoding, bom_len) = Encoding::for_bom(bytes).unwrap_or((UTF_8, 0));
    let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
    if had_errors {
        return Err(ManifestError::Encoding {
            encoding: encoding.name(),
        });
    }
    Ok(text.into_owned())
}

/// Parse a manifest payload as fetched from an archive.
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, ManifestError> {
    parse_manifest_xml(&decode_manifest_bytes(bytes)?)
}

fn attr_value(attr: &Attribute) -> String {
    attr.unescape_value()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned())
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase()
}

fn read_item(e: &BytesStart) -> AddInItem {
    let mut item = AddInItem::default();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_lowercase();
        let value = attr_value(&attr);
        match key.as_str() {
            "uid" => item.uid = value,
            "name" => item.name = value,
            "extendedmoduleuid" => item.extended_module_uid = Some(value),
            "version" => item.version = Some(value),
            "gameversion" => item.game_version = Some(value),
            "priority" => item.priority = value.trim().parse().ok(),
            _ => {}
        }
    }
    item
}

fn xml_error(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> ManifestError {
    ManifestError::Xml {
        position: reader.error_position() as u64,
        message: err.to_string(),
    }
}

/// Where a finished item goes.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ItemList {
    AddIns,
    Offers,
}

/// Parse manifest XML that is already UTF-8.
pub fn parse_manifest_xml(xml: &str) -> Result<Manifest, ManifestError> {
    let mut reader = Reader::from_str(xml);

    let mut manifest = Manifest::default();
    let mut saw_root = false;
    let mut buf = Vec::new();

    let mut current: Option<(ItemList, AddInItem)> = None;
    let mut in_title = false;
    // Raw (still escaped) DefaultText of the current title.
    let mut title_text: Option<String> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(&reader, e))?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match local_name(e).as_str() {
                    "manifest" => {
                        saw_root = true;
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().as_ref().eq_ignore_ascii_case(b"type") {
                                manifest.kind = attr_value(&attr);
                            }
                        }
                    }
                    name @ ("addinitem" | "offeritem") => {
                        let list = if name == "addinitem" {
                            ItemList::AddIns
                        } else {
                            ItemList::Offers
                        };
                        let item = read_item(e);
                        if is_empty {
                            push_item(&mut manifest, list, item);
                        } else {
                            current = Some((list, item));
                        }
                    }
                    "title" if current.is_some() && !is_empty => in_title = true,
                    "defaulttext" if in_title && !is_empty => title_text = Some(String::new()),
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let Some(text) = title_text.as_mut() {
                    text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Event::GeneralRef(ref r) => {
                if let Some(text) = title_text.as_mut() {
                    text.push('&');
                    text.push_str(&String::from_utf8_lossy(r));
                    text.push(';');
                }
            }
            Event::End(ref e) => match String::from_utf8_lossy(e.local_name().as_ref())
                .to_lowercase()
                .as_str()
            {
                "defaulttext" => {
                    if let (Some(raw), Some((_, item))) = (title_text.take(), current.as_mut()) {
                        let text = quick_xml::escape::unescape(&raw)
                            .map(|s| s.trim().to_string())
                            .unwrap_or_else(|_| raw.trim().to_string());
                        if !text.is_empty() {
                            item.title = Some(text);
                        }
                    }
                }
                "title" => in_title = false,
                "addinitem" | "offeritem" => {
                    if let Some((list, item)) = current.take() {
                        push_item(&mut manifest, list, item);
                    }
                }
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ManifestError::MissingRoot);
    }
    Ok(manifest)
}

fn push_item(manifest: &mut Manifest, list: ItemList, item: AddInItem) {
    match list {
        ItemList::AddIns => manifest.add_ins.push(item),
        ItemList::Offers => manifest.offers.push(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-16"?>
<Manifest Type="AddIn">
  <AddInsList>
    <AddInItem UID="demo_addin" Name="Demo &amp; Co" ExtendedModuleUID="DAO_PRC_CP_2"
               Version="1.2" GameVersion="1.0.1008.0" Priority="200" Enabled="1">
      <Title>
        <LocalizedStrings>
          <LocalizedString Id="1" Value="Demo FR"/>
        </LocalizedStrings>
        <DefaultText>Demo &amp; friends</DefaultText>
      </Title>
      <Description><DefaultText>Not the title</DefaultText></Description>
    </AddInItem>
    <AddInItem UID="bare" Name="Bare"/>
  </AddInsList>
  <OfferList>
    <OfferItem UID="offer_1" Name="Offer" Version="2">
      <Title><DefaultText>An offer</DefaultText></Title>
    </OfferItem>
  </OfferList>
</Manifest>"#;

    #[test]
    fn test_parse_sample() {
        let manifest = parse_manifest_xml(SAMPLE).unwrap();
        assert_eq!(manifest.kind, "AddIn");
        assert_eq!(manifest.add_ins.len(), 2);

        let demo = &manifest.add_ins[0];
        assert_eq!(demo.uid, "demo_addin");
        assert_eq!(demo.name, "Demo & Co");
        assert_eq!(demo.extended_module_uid.as_deref(), Some("DAO_PRC_CP_2"));
        assert_eq!(demo.version.as_deref(), Some("1.2"));
        assert_eq!(demo.game_version.as_deref(), Some("1.0.1008.0"));
        assert_eq!(demo.priority, Some(200));
        assert_eq!(demo.title.as_deref(), Some("Demo & friends"));

        let bare = &manifest.add_ins[1];
        assert_eq!(bare.uid, "bare");
        assert_eq!(bare.title, None);
        assert_eq!(bare.priority, None);

        assert_eq!(manifest.offers.len(), 1);
        assert_eq!(manifest.offers[0].title.as_deref(), Some("An offer"));
        assert_eq!(
            manifest.uids().collect::<Vec<_>>(),
            ["demo_addin", "bare", "offer_1"]
        );
    }

    #[test]
    fn test_parse_utf16_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in SAMPLE.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let manifest = parse_manifest(&bytes).unwrap();
        assert_eq!(manifest.add_ins[0].uid, "demo_addin");
    }

    #[test]
    fn test_decode_utf8_bom() {
        let bytes = [0xEF, 0xBB, 0xBF, b'<', b'a', b'/', b'>'];
        assert_eq!(decode_manifest_bytes(&bytes).unwrap(), "<a/>");
        assert_eq!(decode_manifest_bytes(b"<a/>").unwrap(), "<a/>");
    }

    #[test]
    fn test_invalid_utf8_is_an_encoding_error() {
        let err = decode_manifest_bytes(b"<a>\xff\xfe\xfd</a>").unwrap_err();
        assert!(matches!(err, ManifestError::Encoding { encoding: "UTF-8" }));
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_manifest_xml("<Manifest><AddInItem></Manifest>").unwrap_err();
        assert!(matches!(err, ManifestError::Xml { .. }));
    }

    #[test]
    fn test_missing_root() {
        let err = parse_manifest_xml("<Other/>").unwrap_err();
        assert!(matches!(err, ManifestError::MissingRoot));
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = parse_manifest_xml("<Manifest Type=\"AddIn\"/>").unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.kind, "AddIn");
    }
}
