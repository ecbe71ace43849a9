//! Minimal XML element tree shared by feeds, selections, catalogs and
//! application lists.
//!
//! Elements are matched by local name; namespace declarations are only
//! emitted when writing.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::ParseError;

/// An XML element with attributes, text content and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Local name.
    pub name: String,
    /// Attributes in document order (`xmlns` declarations excluded).
    pub attributes: Vec<(String, String)>,
    /// Concatenated text content directly inside this element.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<Element>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: add an attribute.
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder: add an attribute if `value` is `Some`.
    pub fn with_opt_attr<T: ToString>(mut self, key: &str, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.set_attr(key, value.to_string());
        }
        self
    }

    /// Builder: set the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Builder: append a child.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.attributes.push((key.to_string(), value));
        }
    }

    /// Attribute value by local name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Missing`] if the attribute is absent.
    pub fn required_attr(&self, key: &str) -> Result<&str, ParseError> {
        self.attr(key)
            .ok_or_else(|| ParseError::missing(&format!("attribute '{key}'"), &self.name))
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child with the given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Parse a document and return its root element.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Xml`] if the document is malformed or empty.
    pub fn parse(xml: &str) -> Result<Self, ParseError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| ParseError::Xml(e.to_string()))?;
            match event {
                Event::Start(start) => stack.push(start_element(&start)?),
                Event::Empty(start) => {
                    let element = start_element(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ParseError::Xml("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let text = text.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                        current.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ParseError::Xml("unexpected end of document".into()));
        }
        root.ok_or_else(|| ParseError::Xml("document has no root element".into()))
    }

    /// Serialize as a document, declaring `namespace` on the root.
    pub fn to_document(&self, namespace: Option<&str>) -> String {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        // Writing into a Vec cannot fail.
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)));
        write_element(&mut writer, self, namespace);
        let mut out = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        out.push('\n');
        out
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<Element, ParseError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::Xml(e.to_string()))?;
        let key = attr.key;
        if key.as_ref() == b"xmlns" || key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let local = String::from_utf8_lossy(key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ParseError::Xml(e.to_string()))?
            .into_owned();
        element.attributes.push((local, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(ParseError::Xml("multiple root elements".into())),
    }
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element, namespace: Option<&str>) {
    let mut start = BytesStart::new(element.name.as_str());
    if let Some(ns) = namespace {
        start.push_attribute(("xmlns", ns));
    }
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() && element.text.is_empty() {
        let _ = writer.write_event(Event::Empty(start));
        return;
    }

    let _ = writer.write_event(Event::Start(start));
    if !element.text.is_empty() {
        let _ = writer.write_event(Event::Text(BytesText::new(&element.text)));
    }
    for child in &element.children {
        write_element(writer, child, None);
    }
    let _ = writer.write_event(Event::End(BytesEnd::new(element.name.as_str())));
}
