//! Flattened per-class schemas and the offset lookup table.

use crate::error::{SchemaError, SchemaResult};
use crate::hash::class_hash;
use crate::{ClassId, FixedPoint, PropCodec, PropDef, PropFlags, PropIndex, TableDef};

/// A property after flattening, addressed by a stable index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlatProp {
    pub index: PropIndex,
    /// Dotted path, e.g. `origin.x` or `ammo[2]`.
    pub name: String,
    /// Absolute byte offset within the entity's memory.
    pub offset: u32,
    pub codec: PropCodec,
    pub flags: PropFlags,
}

/// Maps entity memory offsets to flattened property indices.
///
/// Several properties may live at the same offset (overlapping views, an
/// array and its first element); lookups return all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetMap {
    entries: Vec<(u32, PropIndex)>,
}

impl OffsetMap {
    fn from_props(props: &[FlatProp]) -> Self {
        let mut entries: Vec<_> = props.iter().map(|p| (p.offset, p.index)).collect();
        entries.sort_unstable();
        Self { entries }
    }

    /// Every property index whose memory starts at `offset`.
    pub fn lookup(&self, offset: u32) -> impl Iterator<Item = PropIndex> + '_ {
        let start = self.entries.partition_point(|(o, _)| *o < offset);
        self.entries[start..]
            .iter()
            .take_while(move |(o, _)| *o == offset)
            .map(|(_, index)| *index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable, flattened description of one entity class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSchema {
    id: ClassId,
    name: String,
    props: Vec<FlatProp>,
    offset_map: OffsetMap,
    tick_relative: Vec<PropIndex>,
    hash: u64,
}

impl ClassSchema {
    pub(crate) fn build(
        id: ClassId,
        root: &TableDef,
        max_props: usize,
        max_depth: usize,
    ) -> SchemaResult<Self> {
        let mut flattener = Flattener {
            class: &root.name,
            props: Vec::new(),
            max_depth,
        };
        flattener.visit(root, "", 0, 0)?;
        let props = flattener.props;

        if props.is_empty() {
            return Err(SchemaError::EmptyClass {
                name: root.name.clone(),
            });
        }
        if props.len() > max_props || props.len() > usize::from(u16::MAX) {
            return Err(SchemaError::TooManyProps {
                class: root.name.clone(),
                count: props.len(),
                max: max_props,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for prop in &props {
            if !seen.insert(prop.name.as_str()) {
                return Err(SchemaError::DuplicatePropName {
                    class: root.name.clone(),
                    prop: prop.name.clone(),
                });
            }
        }

        let offset_map = OffsetMap::from_props(&props);
        let tick_relative = props
            .iter()
            .filter(|p| p.flags.tick_relative)
            .map(|p| p.index)
            .collect();
        let hash = class_hash(&root.name, &props);
        Ok(Self {
            id,
            name: root.name.clone(),
            props,
            offset_map,
            tick_relative,
            hash,
        })
    }

    #[must_use]
    pub const fn id(&self) -> ClassId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flattened properties in index order.
    #[must_use]
    pub fn props(&self) -> &[FlatProp] {
        &self.props
    }

    #[must_use]
    pub fn prop(&self, index: PropIndex) -> Option<&FlatProp> {
        self.props.get(index.as_usize())
    }

    #[must_use]
    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    #[must_use]
    pub const fn offset_map(&self) -> &OffsetMap {
        &self.offset_map
    }

    /// Properties flagged as tick-relative, in index order.
    #[must_use]
    pub fn tick_relative_props(&self) -> &[PropIndex] {
        &self.tick_relative
    }

    /// Layout hash; changed-offset lists must carry this value to be trusted.
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }
}

struct Flattener<'a> {
    class: &'a str,
    props: Vec<FlatProp>,
    max_depth: usize,
}

impl Flattener<'_> {
    fn visit(&mut self, table: &TableDef, prefix: &str, base: u32, depth: usize) -> SchemaResult<()> {
        if depth > self.max_depth {
            return Err(SchemaError::NestingTooDeep {
                class: self.class.to_string(),
                max: self.max_depth,
            });
        }
        for prop in &table.props {
            match prop {
                PropDef::Scalar {
                    name,
                    offset,
                    codec,
                    flags,
                } => {
                    let path = join(prefix, name);
                    self.push(path, base.saturating_add(*offset), *codec, *flags)?;
                }
                PropDef::Array {
                    name,
                    offset,
                    stride,
                    count,
                    codec,
                    flags,
                } => {
                    let path = join(prefix, name);
                    if *count == 0 {
                        return Err(SchemaError::EmptyArray {
                            class: self.class.to_string(),
                            prop: path,
                        });
                    }
                    for element in 0..u32::from(*count) {
                        let at = base
                            .saturating_add(*offset)
                            .saturating_add(stride.saturating_mul(element));
                        self.push(format!("{path}[{element}]"), at, *codec, *flags)?;
                    }
                }
                PropDef::Table {
                    name,
                    offset,
                    table,
                } => {
                    let path = join(prefix, name);
                    self.visit(table, &path, base.saturating_add(*offset), depth + 1)?;
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, name: String, offset: u32, codec: PropCodec, flags: PropFlags) -> SchemaResult<()> {
        validate_codec(&name, codec)?;
        if flags.tick_relative && !codec.is_signed() {
            return Err(SchemaError::TickRelativeUnsigned { prop: name });
        }
        let index = PropIndex::new(u16::try_from(self.props.len()).unwrap_or(u16::MAX));
        self.props.push(FlatProp {
            index,
            name,
            offset,
            codec,
            flags,
        });
        Ok(())
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn validate_codec(prop: &str, codec: PropCodec) -> SchemaResult<()> {
    match codec {
        PropCodec::UInt { bits } | PropCodec::SInt { bits } => {
            if bits == 0 || bits > 64 {
                return Err(SchemaError::InvalidBitWidth {
                    prop: prop.to_string(),
                    bits,
                });
            }
        }
        PropCodec::FixedPoint(fp) => validate_fixed_point(prop, fp)?,
        PropCodec::Bool | PropCodec::VarUInt | PropCodec::VarSInt => {}
    }
    Ok(())
}

fn validate_fixed_point(prop: &str, fp: FixedPoint) -> SchemaResult<()> {
    if fp.scale == 0 {
        return Err(SchemaError::InvalidFixedPointScale {
            prop: prop.to_string(),
            scale: fp.scale,
        });
    }
    if fp.min_q > fp.max_q {
        return Err(SchemaError::InvalidFixedPointRange {
            prop: prop.to_string(),
            min_q: fp.min_q,
            max_q: fp.max_q,
        });
    }
    Ok(())
}
