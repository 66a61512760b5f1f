//! Contribution Model
//!
//! In-memory representation of a module's version-tagged operation fragments,
//! parsed from a module descriptor document.
//!
//! # Descriptor Format
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <contributions width="3">
//!   <module id="versioning" version="012">
//!     <create_table type="sqlstatementlist" name="postgres/versioning/012/create_table.sql" delimiter=";" keepdelimiter="NO"/>
//!     <fix_titles type="javalib" name="content-units" classname="com.example.FixTitles" methodname="run"/>
//!   </module>
//!   <uninstall id="versioning">
//!     <drop_tables type="sqlstatementlist" name="postgres/versioning/uninstall.sql"/>
//!   </uninstall>
//! </contributions>
//! ```
//!
//! # Invariants
//!
//! - Version numbers within a module are unique and strictly increasing in
//!   document order, and zero-padded to the declared width (the root's
//!   `width`, or a `width` on the module's blocks)
//! - Every module declares at least one version block
//! - Every block holds at least one operation entry
//! - Entries keep their raw attribute list so a merged plan can be written
//!   back byte-for-byte
//!
//! Parsing is pure: the only I/O is reading the descriptor files.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use thiserror::Error;

/// Version width used when the root element declares none
pub const DEFAULT_VERSION_WIDTH: usize = 3;

/// `type` attribute value of SQL fragment entries
pub const TYPE_SQL_STATEMENT_LIST: &str = "sqlstatementlist";

/// `type` attribute value of dynamic unit entries
pub const TYPE_UNIT: &str = "javalib";

/// Element name of a version block
pub const ELEMENT_MODULE: &str = "module";

/// Element name of a module's teardown block
pub const ELEMENT_UNINSTALL: &str = "uninstall";

/// Element name of a module's optimize block
pub const ELEMENT_OPTIMIZE: &str = "optimize";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading module descriptors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContributionError {
    /// The document is not well-formed
    #[error("{origin}: invalid document at byte {position}: {reason}")]
    Xml {
        origin: String,
        position: usize,
        reason: String,
    },

    /// An element appeared where the format does not allow it
    #[error("{origin}: unexpected element <{element}> {context}")]
    UnexpectedElement {
        origin: String,
        element: String,
        context: String,
    },

    /// A block element lacks `id` or `version`
    #[error("{origin}: <{element}> is missing required attribute '{attribute}'")]
    MissingBlockAttribute {
        origin: String,
        element: String,
        attribute: &'static str,
    },

    /// Module ids are restricted to `[A-Za-z0-9_.-]+`
    #[error("{origin}: invalid module id '{id}'")]
    InvalidModuleId { origin: String, id: String },

    /// Version text is not exactly `width` ASCII digits
    #[error("module '{module}': version '{version}' is not zero-padded to {width} digits")]
    BadVersionWidth {
        module: String,
        version: String,
        width: usize,
    },

    /// Version numbers must strictly increase in document order
    #[error("module '{module}': version {found} does not follow {previous}")]
    NonIncreasingVersion {
        module: String,
        previous: String,
        found: String,
    },

    /// An operation entry lacks a required attribute
    #[error("module '{module}': entry <{entry}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        module: String,
        entry: String,
        attribute: &'static str,
    },

    /// An attribute has a value the format does not accept
    #[error("module '{module}': entry <{entry}> has invalid {attribute}='{value}'")]
    InvalidAttribute {
        module: String,
        entry: String,
        attribute: &'static str,
        value: String,
    },

    /// The `type` attribute names an unknown entry kind
    #[error("module '{module}': entry <{entry}> has unknown type '{kind}'")]
    UnknownEntryType {
        module: String,
        entry: String,
        kind: String,
    },

    /// A block declares no operation entries
    #[error("module '{module}': <{element}> block declares no entries")]
    EmptyBlock { module: String, element: String },

    /// A module declares its uninstall or optimize block twice
    #[error("module '{module}': <{element}> block declared more than once")]
    DuplicateBlock { module: String, element: String },

    /// A module declares no version block at all
    #[error("module '{module}' declares no version block")]
    NoVersionBlocks { module: String },

    /// Two descriptor documents declare the same module
    #[error("module '{module}' is declared by both {first} and {second}")]
    DuplicateModule {
        module: String,
        first: String,
        second: String,
    },

    /// The configured module order names a module no descriptor declares
    #[error("configured module order names unknown module '{module}'")]
    UnknownOrderedModule { module: String },

    /// A descriptor file or directory could not be read
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },
}

// ============================================================================
// Version
// ============================================================================

/// A fixed-width, zero-padded version number.
///
/// Equality, ordering and hashing only consider the number; the width is
/// kept so the version renders the way the descriptor wrote it.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    number: u32,
    width: u8,
}

impl Version {
    /// Create a version rendered with `width` digits
    pub const fn new(number: u32, width: u8) -> Self {
        Self { number, width }
    }

    /// Parse descriptor text, which must be exactly `width` ASCII digits
    pub fn parse_padded(text: &str, width: usize) -> Option<Self> {
        if text.len() != width || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number = text.parse().ok()?;
        Some(Self::new(number, u8::try_from(width).ok()?))
    }

    /// Parse a recorded marker value, which may or may not be zero-padded
    pub fn parse_recorded(text: &str, width: u8) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        text.parse().ok().map(|number| Self::new(number, width))
    }

    #[inline]
    pub const fn number(self) -> u32 {
        self.number
    }

    #[inline]
    pub const fn width(self) -> u8 {
        self.width
    }

    /// The version right after this one, same width
    pub const fn next(self) -> Self {
        Self::new(self.number + 1, self.width)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.number.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.number, width = self.width as usize)
    }
}

// ============================================================================
// Operation Entries
// ============================================================================

/// One attribute exactly as it appeared in the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub key: String,
    /// Escaped attribute text, as written in the document
    pub raw_value: String,
}

impl RawAttribute {
    pub fn new(key: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw_value: raw_value.into(),
        }
    }
}

/// What an operation entry does when executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// A file of SQL statements separated by `delimiter`
    SqlStatementList {
        file: String,
        delimiter: String,
        keep_delimiter: bool,
    },
    /// A dynamically loaded unit invoked by class name
    Unit {
        /// Name of the code unit the class is packaged in, if declared
        package: Option<String>,
        class_name: String,
        method_name: String,
    },
}

/// A named, typed unit of work inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationEntry {
    /// Element name of the entry (e.g. `create_table`)
    pub name: String,
    pub kind: OperationKind,
    attributes: Vec<RawAttribute>,
}

impl OperationEntry {
    /// Build a `sqlstatementlist` entry with the conventional attribute order
    pub fn sql(name: impl Into<String>, file: impl Into<String>, delimiter: &str, keep: bool) -> Self {
        let file = file.into();
        let attributes = vec![
            RawAttribute::new("type", TYPE_SQL_STATEMENT_LIST),
            RawAttribute::new("name", escape_attribute(&file)),
            RawAttribute::new("delimiter", escape_attribute(delimiter)),
            RawAttribute::new("keepdelimiter", if keep { "YES" } else { "NO" }),
        ];
        Self {
            name: name.into(),
            kind: OperationKind::SqlStatementList {
                file,
                delimiter: delimiter.to_string(),
                keep_delimiter: keep,
            },
            attributes,
        }
    }

    /// Build a `javalib` entry with the conventional attribute order
    pub fn unit(name: impl Into<String>, class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let method_name = method_name.into();
        let attributes = vec![
            RawAttribute::new("type", TYPE_UNIT),
            RawAttribute::new("classname", escape_attribute(&class_name)),
            RawAttribute::new("methodname", escape_attribute(&method_name)),
        ];
        Self {
            name: name.into(),
            kind: OperationKind::Unit {
                package: None,
                class_name,
                method_name,
            },
            attributes,
        }
    }

    /// Raw attributes in document order
    pub fn attributes(&self) -> &[RawAttribute] {
        &self.attributes
    }

    /// File path or class name this entry refers to, for messages
    pub fn target(&self) -> &str {
        match &self.kind {
            OperationKind::SqlStatementList { file, .. } => file,
            OperationKind::Unit { class_name, .. } => class_name,
        }
    }

    /// Render the entry as a self-closing element
    pub fn to_xml(&self) -> String {
        let mut out = format!("<{}", self.name);
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.key);
            out.push_str("=\"");
            out.push_str(&attr.raw_value.replace('"', "&quot;"));
            out.push('"');
        }
        out.push_str("/>");
        out
    }
}

// ============================================================================
// Blocks and Modules
// ============================================================================

/// The operations a module declares for one specific version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionBlock {
    pub version: Version,
    pub entries: Vec<OperationEntry>,
}

/// A module's full contribution: version history plus optional teardown
/// and optimize block sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleContribution {
    id: String,
    /// Descriptor the module was read from
    origin: String,
    width: u8,
    blocks: Vec<VersionBlock>,
    uninstall: Option<Vec<OperationEntry>>,
    optimize: Option<Vec<OperationEntry>>,
}

impl ModuleContribution {
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Declared version width of this module
    #[inline]
    pub fn width(&self) -> u8 {
        self.width
    }

    /// All version blocks in ascending order
    pub fn blocks(&self) -> &[VersionBlock] {
        &self.blocks
    }

    /// Version of the last block in document order
    pub fn latest_version(&self) -> Version {
        // Construction rejects modules without version blocks
        self.blocks
            .last()
            .map(|b| b.version)
            .unwrap_or(Version::new(0, self.width))
    }

    /// Blocks with `from_exclusive < version <= to_inclusive`, ascending.
    ///
    /// `None` as lower bound means "from the first block".
    pub fn blocks_in_range(&self, from_exclusive: Option<Version>, to_inclusive: Version) -> &[VersionBlock] {
        let start = match from_exclusive {
            Some(from) => self.blocks.partition_point(|b| b.version <= from),
            None => 0,
        };
        let end = self.blocks.partition_point(|b| b.version <= to_inclusive);
        if start >= end { &[] } else { &self.blocks[start..end] }
    }

    /// The block declared for exactly `version`
    pub fn block(&self, version: Version) -> Option<&VersionBlock> {
        self.blocks
            .binary_search_by(|b| b.version.cmp(&version))
            .ok()
            .map(|i| &self.blocks[i])
    }

    /// Teardown entries, if the module declares an uninstall block
    pub fn uninstall_entries(&self) -> Option<&[OperationEntry]> {
        self.uninstall.as_deref()
    }

    /// Optimize entries, if the module declares an optimize block
    pub fn optimize_entries(&self) -> Option<&[OperationEntry]> {
        self.optimize.as_deref()
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a descriptor document into its modules, in first-appearance order.
///
/// `origin` names the document in error messages (usually its path).
pub fn parse_descriptor(xml: &str, origin: &str) -> Result<Vec<ModuleContribution>, ContributionError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut builder = DocumentBuilder::new(origin);
    let mut depth = 0usize;
    let mut open_block: Option<OpenBlock> = None;
    let mut in_entry = false;

    loop {
        let event = reader.read_event().map_err(|e| ContributionError::Xml {
            origin: origin.to_string(),
            position: reader.buffer_position(),
            reason: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                match depth {
                    0 => builder.read_root(&e)?,
                    1 => open_block = Some(builder.open_block(&e)?),
                    2 => {
                        let block = open_block.as_mut().ok_or_else(|| builder.unexpected(&e, "outside a block"))?;
                        block.entries.push(parse_entry(&builder.origin, &block.module, &e)?);
                        in_entry = true;
                    }
                    _ => return Err(builder.unexpected(&e, "inside an operation entry")),
                }
                depth += 1;
            }
            Event::Empty(e) => match depth {
                0 => {
                    // A root with no children
                    builder.read_root(&e)?;
                }
                1 => {
                    let block = builder.open_block(&e)?;
                    builder.close_block(block)?;
                }
                2 => {
                    let block = open_block.as_mut().ok_or_else(|| builder.unexpected(&e, "outside a block"))?;
                    block.entries.push(parse_entry(&builder.origin, &block.module, &e)?);
                }
                _ => return Err(builder.unexpected(&e, "inside an operation entry")),
            },
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                match depth {
                    2 => in_entry = false,
                    1 => {
                        if let Some(block) = open_block.take() {
                            builder.close_block(block)?;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(text) => {
                let context = if in_entry { "inside an operation entry" } else { "between elements" };
                return Err(ContributionError::Xml {
                    origin: origin.to_string(),
                    position: reader.buffer_position(),
                    reason: format!(
                        "unexpected text {} ({:?})",
                        context,
                        String::from_utf8_lossy(text.as_ref())
                    ),
                });
            }
            Event::CData(_) => {
                return Err(ContributionError::Xml {
                    origin: origin.to_string(),
                    position: reader.buffer_position(),
                    reason: "CDATA sections are not allowed".to_string(),
                });
            }
            Event::Eof => break,
            // Declaration, comments, processing instructions, doctype
            _ => {}
        }
    }

    builder.finish()
}

/// Load and parse one descriptor file
pub fn load_descriptor(path: &Path) -> Result<Vec<ModuleContribution>, ContributionError> {
    let content = std::fs::read_to_string(path).map_err(|e| ContributionError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_descriptor(&content, &path.display().to_string())
}

/// Discover every module declared by `*.xml` descriptors in `dir`.
///
/// Descriptors are scanned in file-name order, which defines the discovery
/// order of modules. When `order` is non-empty the named modules come first,
/// in that order, followed by the rest in scan order.
///
/// A missing directory yields no modules.
pub fn discover_modules(dir: &Path, order: &[String]) -> Result<Vec<ModuleContribution>, ContributionError> {
    let io_err = |e: std::io::Error| ContributionError::Io {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };

    if !dir.exists() {
        log::warn!("Contribution directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().map(|e| e == "xml").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut modules: Vec<ModuleContribution> = Vec::new();
    for path in &paths {
        for module in load_descriptor(path)? {
            if let Some(existing) = modules.iter().find(|m| m.id == module.id) {
                return Err(ContributionError::DuplicateModule {
                    module: module.id.clone(),
                    first: existing.origin.clone(),
                    second: module.origin.clone(),
                });
            }
            log::debug!(
                "Discovered module '{}' ({} blocks, latest {}) in {}",
                module.id,
                module.blocks.len(),
                module.latest_version(),
                path.display()
            );
            modules.push(module);
        }
    }

    apply_module_order(modules, order)
}

/// Reorder modules so the ones named in `order` come first
pub fn apply_module_order(
    mut modules: Vec<ModuleContribution>,
    order: &[String],
) -> Result<Vec<ModuleContribution>, ContributionError> {
    if order.is_empty() {
        return Ok(modules);
    }

    let mut ordered = Vec::with_capacity(modules.len());
    for id in order {
        let index = modules
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| ContributionError::UnknownOrderedModule { module: id.clone() })?;
        ordered.push(modules.remove(index));
    }
    ordered.extend(modules);
    Ok(ordered)
}

/// Escape text for use inside a double-quoted attribute
pub fn escape_attribute(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

/// Returns true if `id` is a valid module id
pub fn is_valid_module_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// One attribute with both raw and unescaped text
struct ParsedAttribute {
    key: String,
    raw: String,
    value: String,
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn read_attributes(e: &BytesStart, origin: &str) -> Result<Vec<ParsedAttribute>, ContributionError> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ContributionError::Xml {
            origin: origin.to_string(),
            position: 0,
            reason: err.to_string(),
        })?;
        let value = attr.unescape_value().map_err(|err| ContributionError::Xml {
            origin: origin.to_string(),
            position: 0,
            reason: err.to_string(),
        })?;
        attributes.push(ParsedAttribute {
            key: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            raw: String::from_utf8_lossy(&attr.value).into_owned(),
            value: value.into_owned(),
        });
    }
    Ok(attributes)
}

fn find<'a>(attributes: &'a [ParsedAttribute], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.key == key)
        .map(|a| a.value.as_str())
}

fn parse_entry(origin: &str, module: &str, e: &BytesStart) -> Result<OperationEntry, ContributionError> {
    let name = element_name(e);
    let attributes = read_attributes(e, origin)?;
    let missing = |attribute: &'static str| ContributionError::MissingAttribute {
        module: module.to_string(),
        entry: name.clone(),
        attribute,
    };

    let kind = match find(&attributes, "type").ok_or_else(|| missing("type"))? {
        TYPE_SQL_STATEMENT_LIST => {
            let file = find(&attributes, "name").filter(|f| !f.is_empty()).ok_or_else(|| missing("name"))?;
            let delimiter = find(&attributes, "delimiter").unwrap_or(";");
            if delimiter.is_empty() {
                return Err(ContributionError::InvalidAttribute {
                    module: module.to_string(),
                    entry: name.clone(),
                    attribute: "delimiter",
                    value: String::new(),
                });
            }
            let keep_delimiter = match find(&attributes, "keepdelimiter") {
                None => false,
                Some(flag) => parse_flag(flag).ok_or_else(|| ContributionError::InvalidAttribute {
                    module: module.to_string(),
                    entry: name.clone(),
                    attribute: "keepdelimiter",
                    value: flag.to_string(),
                })?,
            };
            OperationKind::SqlStatementList {
                file: file.to_string(),
                delimiter: delimiter.to_string(),
                keep_delimiter,
            }
        }
        TYPE_UNIT => {
            let class_name = find(&attributes, "classname").filter(|c| !c.is_empty()).ok_or_else(|| missing("classname"))?;
            let method_name = find(&attributes, "methodname").filter(|m| !m.is_empty()).ok_or_else(|| missing("methodname"))?;
            OperationKind::Unit {
                package: find(&attributes, "name").map(str::to_string),
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
            }
        }
        other => {
            return Err(ContributionError::UnknownEntryType {
                module: module.to_string(),
                entry: name,
                kind: other.to_string(),
            });
        }
    };

    Ok(OperationEntry {
        name,
        kind,
        attributes: attributes
            .into_iter()
            .map(|a| RawAttribute::new(a.key, a.raw))
            .collect(),
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "Y" => Some(true),
        "NO" | "FALSE" | "N" => Some(false),
        _ => None,
    }
}

/// Which block element is currently open
enum OpenBlockKind {
    Version(Version),
    Uninstall,
    Optimize,
}

struct OpenBlock {
    module: String,
    element: String,
    kind: OpenBlockKind,
    entries: Vec<OperationEntry>,
}

struct ModuleBuilder {
    id: String,
    blocks: Vec<VersionBlock>,
    uninstall: Option<Vec<OperationEntry>>,
    optimize: Option<Vec<OperationEntry>>,
}

/// Accumulates modules while a document is read
struct DocumentBuilder {
    origin: String,
    width: usize,
    modules: Vec<ModuleBuilder>,
    index: HashMap<String, usize>,
}

impl DocumentBuilder {
    fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            width: DEFAULT_VERSION_WIDTH,
            modules: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn unexpected(&self, e: &BytesStart, context: &str) -> ContributionError {
        ContributionError::UnexpectedElement {
            origin: self.origin.clone(),
            element: element_name(e),
            context: context.to_string(),
        }
    }

    fn read_root(&mut self, e: &BytesStart) -> Result<(), ContributionError> {
        let attributes = read_attributes(e, &self.origin)?;
        if let Some(width) = find(&attributes, "width") {
            self.width = self.parse_width(width)?;
        }
        Ok(())
    }

    fn parse_width(&self, text: &str) -> Result<usize, ContributionError> {
        text.parse()
            .ok()
            .filter(|w| (1..=9).contains(w))
            .ok_or_else(|| ContributionError::Xml {
                origin: self.origin.clone(),
                position: 0,
                reason: format!("invalid version width '{}'", text),
            })
    }

    fn open_block(&mut self, e: &BytesStart) -> Result<OpenBlock, ContributionError> {
        let element = element_name(e);
        let attributes = read_attributes(e, &self.origin)?;
        let missing = |attribute: &'static str| ContributionError::MissingBlockAttribute {
            origin: self.origin.clone(),
            element: element.clone(),
            attribute,
        };

        let id = find(&attributes, "id").ok_or_else(|| missing("id"))?.to_string();
        if !is_valid_module_id(&id) {
            return Err(ContributionError::InvalidModuleId {
                origin: self.origin.clone(),
                id,
            });
        }

        let kind = match element.as_str() {
            ELEMENT_MODULE => {
                let text = find(&attributes, "version").ok_or_else(|| missing("version"))?;
                // A block may override the document width for its module
                let width = match find(&attributes, "width") {
                    Some(declared) => self.parse_width(declared)?,
                    None => self.width,
                };
                let version = Version::parse_padded(text, width).ok_or_else(|| {
                    ContributionError::BadVersionWidth {
                        module: id.clone(),
                        version: text.to_string(),
                        width,
                    }
                })?;
                OpenBlockKind::Version(version)
            }
            ELEMENT_UNINSTALL => OpenBlockKind::Uninstall,
            ELEMENT_OPTIMIZE => OpenBlockKind::Optimize,
            _ => return Err(self.unexpected(e, "at block level")),
        };

        Ok(OpenBlock {
            module: id,
            element,
            kind,
            entries: Vec::new(),
        })
    }

    fn close_block(&mut self, block: OpenBlock) -> Result<(), ContributionError> {
        if block.entries.is_empty() {
            return Err(ContributionError::EmptyBlock {
                module: block.module,
                element: block.element,
            });
        }

        let slot = match self.index.get(&block.module) {
            Some(&i) => i,
            None => {
                self.index.insert(block.module.clone(), self.modules.len());
                self.modules.push(ModuleBuilder {
                    id: block.module.clone(),
                    blocks: Vec::new(),
                    uninstall: None,
                    optimize: None,
                });
                self.modules.len() - 1
            }
        };
        let module = &mut self.modules[slot];

        match block.kind {
            OpenBlockKind::Version(version) => {
                if let Some(previous) = module.blocks.last() {
                    if version.width() != previous.version.width() {
                        return Err(ContributionError::BadVersionWidth {
                            module: block.module,
                            version: version.to_string(),
                            width: previous.version.width() as usize,
                        });
                    }
                    if version <= previous.version {
                        return Err(ContributionError::NonIncreasingVersion {
                            module: block.module,
                            previous: previous.version.to_string(),
                            found: version.to_string(),
                        });
                    }
                }
                module.blocks.push(VersionBlock {
                    version,
                    entries: block.entries,
                });
            }
            OpenBlockKind::Uninstall | OpenBlockKind::Optimize => {
                let target = if matches!(block.kind, OpenBlockKind::Uninstall) {
                    &mut module.uninstall
                } else {
                    &mut module.optimize
                };
                if target.is_some() {
                    return Err(ContributionError::DuplicateBlock {
                        module: block.module,
                        element: block.element,
                    });
                }
                *target = Some(block.entries);
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<ModuleContribution>, ContributionError> {
        self.modules
            .into_iter()
            .map(|m| {
                let width = match m.blocks.first() {
                    Some(block) => block.version.width(),
                    None => return Err(ContributionError::NoVersionBlocks { module: m.id }),
                };
                Ok(ModuleContribution {
                    id: m.id,
                    origin: self.origin.clone(),
                    width,
                    blocks: m.blocks,
                    uninstall: m.uninstall,
                    optimize: m.optimize,
                })
            })
            .collect()
    }
}
