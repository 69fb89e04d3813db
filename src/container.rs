//! Container file format
//!
//! ASDF-style layout: a short comment header, a YAML tree holding the
//! document under the `roman` key, a `...` end marker, then binary blocks
//! for every array leaf.
//!
//! ```text
//! #ASDF 1.0.0
//! #ASDF_STANDARD 1.5.0
//! ---
//! roman: !asdf://stsci.edu/datamodels/roman/tags/... { ... }
//! ...
//! \xd3BLK <header> <data>
//! \xd3BLK <header> <data>
//! ```
//!
//! Block header (big endian): u16 header size, u32 flags, 4-byte
//! compression, u64 allocated size, u64 used size, u64 data size and a
//! 16-byte checksum.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Value as YamlValue};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::checksum::{BlockChecksum, CHECKSUM_LEN};
use crate::config;
use crate::error::{DataModelError, Result};
use crate::ndarray::{ByteOrder, DataType, NdArray};
use crate::node::{check_key, Node, Value};
use crate::tag::NDARRAY_TAG;

/// Top-level key holding the document tree
pub const ROOT_KEY: &str = "roman";

const FILE_MAGIC: &[u8] = b"#ASDF ";
const FILE_HEADER: &str = "#ASDF 1.0.0\n#ASDF_STANDARD 1.5.0\n";
const DOC_END: &[u8] = b"\n...\n";
const BLOCK_MAGIC: [u8; 4] = [0xd3, b'B', b'L', b'K'];
const BLOCK_HEADER_SIZE: u16 = 48;

/// Tree-side description of an array stored in a block
#[derive(Debug, Serialize, Deserialize)]
struct ArrayDescriptor {
    source: usize,
    datatype: DataType,
    #[serde(default)]
    byteorder: ByteOrder,
    shape: Vec<usize>,
}

/// Serialize `root` (stored under [`ROOT_KEY`]) into a complete file image
pub fn encode(root: &Node) -> Result<Vec<u8>> {
    let mut blocks: Vec<Vec<u8>> = Vec::new();
    let mut tree = Mapping::new();
    tree.insert(YamlValue::from(ROOT_KEY), node_to_yaml(root, &mut blocks)?);
    let yaml = serde_yaml::to_string(&YamlValue::Mapping(tree))?;

    let mut out = Vec::with_capacity(yaml.len() + blocks.iter().map(|b| b.len() + 54).sum::<usize>());
    out.extend_from_slice(FILE_HEADER.as_bytes());
    if !yaml.starts_with("---") {
        out.extend_from_slice(b"---\n");
    }
    out.extend_from_slice(yaml.as_bytes());
    if !yaml.ends_with('\n') {
        out.push(b'\n');
    }
    out.extend_from_slice(&DOC_END[1..]);
    for block in &blocks {
        write_block(&mut out, block);
    }
    trace!(bytes = out.len(), blocks = blocks.len(), "encoded container");
    Ok(out)
}

/// Parse a complete file image and return the node stored under [`ROOT_KEY`]
pub fn decode(bytes: &[u8]) -> Result<Node> {
    if !bytes.starts_with(FILE_MAGIC) {
        return Err(DataModelError::Format("missing #ASDF header".to_string()));
    }
    let end = find(bytes, DOC_END)
        .ok_or_else(|| DataModelError::Format("missing document end marker".to_string()))?;
    let text = std::str::from_utf8(&bytes[..=end])
        .map_err(|e| DataModelError::Format(format!("tree is not UTF-8: {}", e)))?;
    let blocks = read_blocks(&bytes[end + DOC_END.len()..])?;

    let tree: YamlValue = serde_yaml::from_str(text)?;
    let YamlValue::Mapping(mut tree) = tree else {
        return Err(DataModelError::Format("tree root is not a mapping".to_string()));
    };
    let root = tree
        .remove(ROOT_KEY)
        .ok_or_else(|| DataModelError::Format(format!("missing root key '{}'", ROOT_KEY)))?;
    match yaml_to_value(root, &blocks)? {
        Value::Node(node) => Ok(node),
        other => Err(DataModelError::Format(format!(
            "root '{}' is a {}, not a node",
            ROOT_KEY,
            other.type_name()
        ))),
    }
}

/// Write a file image to `writer`
pub fn write_tree<W: Write>(writer: &mut W, root: &Node) -> Result<()> {
    writer.write_all(&encode(root)?)?;
    writer.flush()?;
    Ok(())
}

/// Read a whole file image from `reader`
pub fn read_tree<R: Read>(reader: &mut R) -> Result<Node> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode(&bytes)
}

pub fn read_file(path: &Path) -> Result<Node> {
    let mut file = fs::File::open(path)?;
    read_tree(&mut file)
}

/// Encode fully in memory, write a uniquely named temporary file in the
/// target directory, then rename it over `path`. The temporary file is
/// removed if anything fails before the rename.
pub fn write_file(path: &Path, root: &Node) -> Result<()> {
    let bytes = encode(root)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote container");
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn node_to_yaml(node: &Node, blocks: &mut Vec<Vec<u8>>) -> Result<YamlValue> {
    let mut mapping = Mapping::new();
    for (key, value) in node.iter() {
        mapping.insert(YamlValue::from(key), value_to_yaml(value, blocks)?);
    }
    let mapping = YamlValue::Mapping(mapping);
    Ok(match node.tag() {
        Some(tag) => tagged(tag, mapping),
        None => mapping,
    })
}

fn value_to_yaml(value: &Value, blocks: &mut Vec<Vec<u8>>) -> Result<YamlValue> {
    Ok(match value {
        Value::Null => YamlValue::Null,
        Value::Bool(b) => YamlValue::Bool(*b),
        Value::Int(i) => YamlValue::Number((*i).into()),
        Value::Float(f) => YamlValue::Number((*f).into()),
        Value::Str(s) => YamlValue::String(s.clone()),
        Value::Array(array) => {
            let descriptor = ArrayDescriptor {
                source: blocks.len(),
                datatype: array.dtype(),
                byteorder: ByteOrder::Little,
                shape: array.shape().to_vec(),
            };
            blocks.push(array.to_le_bytes());
            tagged(NDARRAY_TAG, serde_yaml::to_value(&descriptor)?)
        }
        Value::List(items) => YamlValue::Sequence(
            items
                .iter()
                .map(|v| value_to_yaml(v, blocks))
                .collect::<Result<_>>()?,
        ),
        Value::Node(node) => node_to_yaml(node, blocks)?,
    })
}

fn tagged(tag: &str, value: YamlValue) -> YamlValue {
    YamlValue::Tagged(Box::new(TaggedValue {
        tag: Tag::new(tag),
        value,
    }))
}

/// Tag text without the YAML local-tag marker
fn tag_text(tag: &Tag) -> String {
    let text = tag.to_string();
    let text = text.trim_start_matches('!');
    text.strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(text)
        .to_string()
}

fn yaml_to_value(value: YamlValue, blocks: &[Vec<u8>]) -> Result<Value> {
    Ok(match value {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(b),
        YamlValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        YamlValue::String(s) => Value::Str(s),
        YamlValue::Sequence(items) => Value::List(
            items
                .into_iter()
                .map(|v| yaml_to_value(v, blocks))
                .collect::<Result<_>>()?,
        ),
        YamlValue::Mapping(mapping) => Value::Node(mapping_to_node(mapping, None, blocks)?),
        YamlValue::Tagged(tagged) => {
            let TaggedValue { tag, value } = *tagged;
            let tag = tag_text(&tag);
            if tag == NDARRAY_TAG {
                return Ok(Value::Array(decode_array(value, blocks)?));
            }
            match value {
                YamlValue::Mapping(mapping) => {
                    Value::Node(mapping_to_node(mapping, Some(tag), blocks)?)
                }
                other => {
                    return Err(DataModelError::Format(format!(
                        "tag {} on a non-mapping value {:?}",
                        tag, other
                    )))
                }
            }
        }
    })
}

fn mapping_to_node(mapping: Mapping, tag: Option<String>, blocks: &[Vec<u8>]) -> Result<Node> {
    let mut node = match tag {
        Some(tag) => Node::tagged(tag),
        None => Node::new(),
    };
    for (key, value) in mapping {
        let YamlValue::String(key) = key else {
            return Err(DataModelError::Format(format!("non-string key {:?}", key)));
        };
        check_key(&key)?;
        node.insert_raw(key, yaml_to_value(value, blocks)?);
    }
    Ok(node)
}

fn decode_array(value: YamlValue, blocks: &[Vec<u8>]) -> Result<NdArray> {
    let descriptor: ArrayDescriptor = serde_yaml::from_value(value)?;
    let block = blocks.get(descriptor.source).ok_or_else(|| {
        DataModelError::Format(format!(
            "array source {} but file has {} blocks",
            descriptor.source,
            blocks.len()
        ))
    })?;
    NdArray::from_bytes(descriptor.datatype, descriptor.shape, block, descriptor.byteorder)
}

fn write_block(out: &mut Vec<u8>, data: &[u8]) {
    let size = data.len() as u64;
    out.extend_from_slice(&BLOCK_MAGIC);
    out.extend_from_slice(&BLOCK_HEADER_SIZE.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(BlockChecksum::from_bytes(data).as_bytes());
    out.extend_from_slice(data);
}

/// Cursor over the block region
struct BlockReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| DataModelError::Format("truncated block".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn len(&mut self) -> Result<usize> {
        usize::try_from(self.u64()?)
            .map_err(|_| DataModelError::Format("block size overflows usize".to_string()))
    }
}

fn read_blocks(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = BlockReader { bytes, pos: 0 };
    let mut blocks = Vec::new();
    while reader.pos < bytes.len() {
        let index = blocks.len();
        if reader.array::<4>()? != BLOCK_MAGIC {
            return Err(DataModelError::Format(format!("bad magic for block {}", index)));
        }
        let header_size = u16::from_be_bytes(reader.array()?) as usize;
        if header_size < BLOCK_HEADER_SIZE as usize {
            return Err(DataModelError::Format(format!(
                "block {} header too small: {}",
                index, header_size
            )));
        }
        let header_start = reader.pos;
        let _flags = reader.array::<4>()?;
        if reader.array::<4>()? != [0u8; 4] {
            return Err(DataModelError::Format(format!("block {} is compressed", index)));
        }
        let allocated = reader.len()?;
        let used = reader.len()?;
        let _data_size = reader.len()?;
        let checksum = BlockChecksum::from_header(reader.array::<CHECKSUM_LEN>()?);
        reader.take(header_size - (reader.pos - header_start))?;
        if used > allocated {
            return Err(DataModelError::Format(format!(
                "block {} uses {} of {} bytes",
                index, used, allocated
            )));
        }
        let region = reader.take(allocated)?;
        let data = &region[..used];
        if config::verify_checksums() && !checksum.verify(data) {
            return Err(DataModelError::ChecksumMismatch {
                block: index,
                expected: checksum.to_string(),
                actual: BlockChecksum::from_bytes(data).to_string(),
            });
        }
        blocks.push(data.to_vec());
    }
    Ok(blocks)
}
