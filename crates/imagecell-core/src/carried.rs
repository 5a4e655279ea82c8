//! Package content imagecell does not model but keeps for the output
//!
//! Defined names, sheet views, data validations, conditional formats and
//! similar elements are read as raw XML and written back at their place in
//! the part. Relationships to external targets, such as hyperlink URLs, travel
//! with the elements that reference them.

/// One top-level element of a workbook or worksheet part, as raw XML
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    xml: String,
}

impl XmlElement {
    /// `name` is the local element name, `xml` the complete element
    pub fn new<N: Into<String>, X: Into<String>>(name: N, xml: X) -> Self {
        Self {
            name: name.into(),
            xml: xml.into(),
        }
    }

    /// Local name, such as `definedNames`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialized element, start tag through end tag
    pub fn xml(&self) -> &str {
        &self.xml
    }
}

/// Relationship to a target outside the package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    /// Relationship id referenced from the carried XML (`r:id`)
    pub id: String,
    /// Relationship type URI
    pub rel_type: String,
    /// Target URI, unescaped
    pub target: String,
}

/// Everything carried for one workbook or worksheet part
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarriedXml {
    /// Root attributes besides the main and relationship namespaces, such as
    /// `xmlns:mc` or `mc:Ignorable`; values unescaped
    pub root_attributes: Vec<(String, String)>,
    /// Elements in source order
    pub elements: Vec<XmlElement>,
    /// External relationships the elements reference
    pub external_links: Vec<ExternalLink>,
}

impl CarriedXml {
    /// Nothing to carry
    pub fn is_empty(&self) -> bool {
        self.root_attributes.is_empty() && self.elements.is_empty() && self.external_links.is_empty()
    }

    /// First carried element with this local name
    pub fn element(&self, name: &str) -> Option<&XmlElement> {
        self.elements.iter().find(|e| e.name() == name)
    }

    /// Relationship ids already taken by external links
    pub fn link_ids(&self) -> impl Iterator<Item = &str> {
        self.external_links.iter().map(|link| link.id.as_str())
    }
}
