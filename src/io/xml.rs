//! Namespace-aware XML metadata access
//!
//! SAFE manifests declare their namespaces with prefixes that vary between
//! product versions, so fields cannot be located by literal qualified names.
//! Documents are read into a small element tree; lookups resolve the prefix
//! of both the query and the element through the namespace map discovered
//! from the document itself, and match on (URI, local name).

use crate::types::{SarError, SarResult};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// One XML element with raw (possibly prefixed) tag name
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

/// A parsed document plus its discovered namespace prefixes
#[derive(Debug, Clone)]
pub struct XmlDoc {
    pub root: XmlNode,
    pub namespaces: HashMap<String, String>,
}

/// Collect every `xmlns` declaration in the document as prefix -> URI.
///
/// Pure function over the raw text; the default namespace is stored under
/// the empty prefix.
pub fn discover_namespaces(xml: &str) -> HashMap<String, String> {
    let mut namespaces = HashMap::new();
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    let value = attr
                        .unescape_value()
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    if key == "xmlns" {
                        namespaces.insert(String::new(), value);
                    } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                        namespaces.insert(prefix.to_string(), value);
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    namespaces
}

/// Parse a document into an element tree.
pub fn parse(xml: &str) -> SarResult<XmlDoc> {
    let namespaces = discover_namespaces(xml);
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SarError::Xml(format!("parse error at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(e) => {
                stack.push(node_from_start(&e)?);
            }
            Event::Empty(e) => {
                let node = node_from_start(&e)?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| SarError::Xml(e.to_string()))?;
                    top.text.push_str(text.trim());
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(String::from_utf8_lossy(&t).trim());
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    SarError::Xml("unbalanced closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let root = root.ok_or_else(|| SarError::Xml("document has no root element".to_string()))?;
    Ok(XmlDoc { root, namespaces })
}

fn node_from_start(e: &quick_xml::events::BytesStart<'_>) -> SarResult<XmlNode> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| SarError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| SarError::Xml(e.to_string()))?
            .to_string();
        attributes.push((key, value));
    }
    Ok(XmlNode {
        tag,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// One segment of a lookup path: qualified name plus optional attribute test
struct Segment<'a> {
    qname: &'a str,
    attr: Option<(&'a str, &'a str)>,
}

fn parse_segment(seg: &str) -> Segment<'_> {
    match seg.split_once('[') {
        Some((qname, rest)) => {
            // form: name[@key="value"]
            let filter = rest
                .trim_end_matches(']')
                .trim_start_matches('@')
                .split_once('=')
                .map(|(k, v)| (k, v.trim_matches('"')));
            Segment {
                qname,
                attr: filter,
            }
        }
        None => Segment {
            qname: seg,
            attr: None,
        },
    }
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

impl XmlNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn matches(&self, segment: &Segment<'_>, namespaces: &HashMap<String, String>) -> bool {
        let (q_prefix, q_local) = split_qname(segment.qname);
        let (e_prefix, e_local) = split_qname(&self.tag);
        if q_local != e_local {
            return false;
        }
        let name_ok = match q_prefix {
            // unqualified query: match on local name regardless of prefix
            None => true,
            Some(qp) => {
                let q_uri = namespaces.get(qp);
                let e_uri = namespaces.get(e_prefix.unwrap_or(""));
                match (q_uri, e_uri) {
                    (Some(a), Some(b)) => a == b,
                    // undeclared prefixes fall back to literal comparison
                    _ => Some(qp) == e_prefix,
                }
            }
        };
        if !name_ok {
            return false;
        }
        match segment.attr {
            Some((key, value)) => self.attr(key) == Some(value),
            None => true,
        }
    }

    fn collect_descendants<'a>(
        &'a self,
        segment: &Segment<'_>,
        namespaces: &HashMap<String, String>,
        out: &mut Vec<&'a XmlNode>,
    ) {
        for child in &self.children {
            if child.matches(segment, namespaces) {
                out.push(child);
            }
            child.collect_descendants(segment, namespaces, out);
        }
    }
}

impl XmlDoc {
    /// All elements matching a descendant path such as
    /// `"missionInfo/orbitDirection"` or `"s1sarl1:mode"`. The first segment
    /// matches anywhere in the tree, subsequent segments match direct
    /// children, like an ElementTree `.//` expression.
    pub fn findall(&self, path: &str) -> Vec<&XmlNode> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = match segments.next() {
            Some(s) => parse_segment(s),
            None => return Vec::new(),
        };
        let mut current = Vec::new();
        if self.root.matches(&first, &self.namespaces) {
            current.push(&self.root);
        }
        self.root
            .collect_descendants(&first, &self.namespaces, &mut current);
        for seg in segments {
            let seg = parse_segment(seg);
            let mut next = Vec::new();
            for node in current {
                for child in &node.children {
                    if child.matches(&seg, &self.namespaces) {
                        next.push(child);
                    }
                }
            }
            current = next;
        }
        current
    }

    pub fn find(&self, path: &str) -> Option<&XmlNode> {
        self.findall(path).into_iter().next()
    }

    /// Text content of the first matching element, as a hard requirement.
    pub fn find_text(&self, path: &str) -> SarResult<&str> {
        self.find(path)
            .map(|n| n.text.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SarError::Xml(format!("missing XML node: {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xfdu:XFDU xmlns:xfdu="urn:ccsds:schema:xfdu:1"
           xmlns:safe="http://www.esa.int/safe/sentinel-1.0"
           xmlns:s1sarl1="http://www.esa.int/safe/sentinel-1.0/sentinel-1/sar/level-1">
  <metadataSection>
    <safe:acquisitionPeriod>
      <safe:startTime>2020-01-01T00:00:00.000000</safe:startTime>
      <safe:stopTime>2020-01-01T00:00:25.000000</safe:stopTime>
    </safe:acquisitionPeriod>
    <safe:orbitReference>
      <safe:orbitNumber type="start">30639</safe:orbitNumber>
      <safe:orbitNumber type="stop">30639</safe:orbitNumber>
    </safe:orbitReference>
    <s1sarl1:standAloneProductInformation>
      <s1sarl1:mode>IW</s1sarl1:mode>
      <s1sarl1:transmitterReceiverPolarisation>VV</s1sarl1:transmitterReceiverPolarisation>
      <s1sarl1:transmitterReceiverPolarisation>VH</s1sarl1:transmitterReceiverPolarisation>
    </s1sarl1:standAloneProductInformation>
  </metadataSection>
</xfdu:XFDU>"#;

    #[test]
    fn discovers_declared_namespaces() {
        let ns = discover_namespaces(MANIFEST);
        assert_eq!(ns["safe"], "http://www.esa.int/safe/sentinel-1.0");
        assert_eq!(ns["xfdu"], "urn:ccsds:schema:xfdu:1");
        assert_eq!(ns.len(), 3);
    }

    #[test]
    fn finds_namespaced_elements() {
        let doc = parse(MANIFEST).unwrap();
        assert_eq!(doc.find_text("s1sarl1:mode").unwrap(), "IW");
        assert_eq!(
            doc.find_text("safe:startTime").unwrap(),
            "2020-01-01T00:00:00.000000"
        );
    }

    #[test]
    fn matches_by_uri_across_differing_prefixes() {
        // same document, renamed prefix for the level-1 namespace
        let renamed = MANIFEST.replace("s1sarl1", "l1prod");
        let mut doc = parse(&renamed).unwrap();
        assert!(doc.find("s1sarl1:mode").is_none());
        // queries resolve once the caller's prefix is bound to the same URI
        doc.namespaces.insert(
            "s1sarl1".to_string(),
            "http://www.esa.int/safe/sentinel-1.0/sentinel-1/sar/level-1".to_string(),
        );
        assert_eq!(doc.find_text("s1sarl1:mode").unwrap(), "IW");
    }

    #[test]
    fn attribute_filtered_lookup() {
        let doc = parse(MANIFEST).unwrap();
        let node = doc.find("safe:orbitNumber[@type=\"start\"]").unwrap();
        assert_eq!(node.text, "30639");
    }

    #[test]
    fn findall_collects_repeated_elements() {
        let doc = parse(MANIFEST).unwrap();
        let pols: Vec<&str> = doc
            .findall("s1sarl1:transmitterReceiverPolarisation")
            .into_iter()
            .map(|n| n.text.as_str())
            .collect();
        assert_eq!(pols, vec!["VV", "VH"]);
    }

    #[test]
    fn nested_path_lookup() {
        let xml = r#"<level1Product>
            <missionInfo><orbitDirection>ASCENDING</orbitDirection></missionInfo>
        </level1Product>"#;
        let doc = parse(xml).unwrap();
        assert_eq!(
            doc.find_text("missionInfo/orbitDirection").unwrap(),
            "ASCENDING"
        );
    }
}
