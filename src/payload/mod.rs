//! Payload schema value model.
//!
//! A channel's payload is described by a recursive tagged union. The wire
//! form is JSON with a `type` discriminator:
//!
//! ```text
//! {"type":"OBJECT","id":1,"properties":{
//!     "value":{"type":"BASIC","format":"STRING"},
//!     "children":{"type":"ARRAY","items":{"type":"REF","identifier":1}}}}
//! ```
//!
//! Objects may carry an `id`; `REF` schemas point back to the object with that
//! id, which is how tree-shaped payloads are expressed.

pub mod matcher;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

pub use matcher::{matches, matches_optional, SchemaMatcher};

/// Scalar formats a `BASIC` schema may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BasicFormat {
    Integer,
    Number,
    Boolean,
    String,
}

/// Schema of a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadSchema {
    /// Scalar value of a fixed format.
    Basic(BasicSchema),
    /// A single literal value.
    Const(ConstantSchema),
    /// One of a closed set of string values.
    Enum(EnumSchema),
    /// Named properties, optionally identified for references.
    Object(ObjectSchema),
    /// Homogeneous list.
    Array(ArraySchema),
    /// Value must satisfy every item.
    AllOf(CombinatorSchema),
    /// Value must satisfy at least one item.
    AnyOf(CombinatorSchema),
    /// Value must satisfy exactly one item.
    OneOf(CombinatorSchema),
    /// Reference to an identified object schema.
    Ref(ReferenceSchema),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicSchema {
    pub format: BasicFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantSchema {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumSchema {
    pub values: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Identifier that `REF` schemas resolve to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(default)]
    pub properties: BTreeMap<String, PayloadSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySchema {
    pub items: Box<PayloadSchema>,
}

/// Items of an `ALL_OF`, `ANY_OF` or `ONE_OF` schema.
///
/// Item order carries no meaning; two combinators are compared as multisets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinatorSchema {
    #[serde(default)]
    pub items: Vec<PayloadSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSchema {
    pub identifier: i32,
}

impl PayloadSchema {
    /// Scalar schema of the given format.
    pub fn basic(format: BasicFormat) -> Self {
        Self::Basic(BasicSchema { format })
    }

    /// Literal schema.
    pub fn constant(value: impl Into<String>) -> Self {
        Self::Const(ConstantSchema {
            value: value.into(),
        })
    }

    /// Enumeration schema over the given values.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(EnumSchema {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Anonymous object schema.
    pub fn object<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = (S, PayloadSchema)>,
        S: Into<String>,
    {
        Self::Object(ObjectSchema {
            id: None,
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }

    /// Object schema that references can point to.
    pub fn identified_object<I, S>(id: i32, properties: I) -> Self
    where
        I: IntoIterator<Item = (S, PayloadSchema)>,
        S: Into<String>,
    {
        Self::Object(ObjectSchema {
            id: Some(id),
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })
    }

    /// Array schema.
    pub fn array(items: PayloadSchema) -> Self {
        Self::Array(ArraySchema {
            items: Box::new(items),
        })
    }

    /// Reference to the object identified by `identifier`.
    pub fn reference(identifier: i32) -> Self {
        Self::Ref(ReferenceSchema { identifier })
    }

    /// Short name of the variant, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Basic(_) => "BASIC",
            Self::Const(_) => "CONST",
            Self::Enum(_) => "ENUM",
            Self::Object(_) => "OBJECT",
            Self::Array(_) => "ARRAY",
            Self::AllOf(_) => "ALL_OF",
            Self::AnyOf(_) => "ANY_OF",
            Self::OneOf(_) => "ONE_OF",
            Self::Ref(_) => "REF",
        }
    }
}

/// Table mapping object identifiers to the object schemas they name.
#[derive(Debug, Clone, Default)]
pub struct References<'a> {
    objects: HashMap<i32, &'a ObjectSchema>,
}

impl<'a> References<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every identified object reachable from `schema`.
    ///
    /// When the same identifier is declared twice, the outermost declaration
    /// wins; inner declarations shadow it again while they are being matched.
    pub fn collect(schema: &'a PayloadSchema) -> Self {
        let mut refs = Self::new();
        refs.collect_into(schema);
        refs
    }

    fn collect_into(&mut self, schema: &'a PayloadSchema) {
        match schema {
            PayloadSchema::Object(object) => {
                if let Some(id) = object.id {
                    self.objects.entry(id).or_insert(object);
                }
                for property in object.properties.values() {
                    self.collect_into(property);
                }
            }
            PayloadSchema::Array(array) => self.collect_into(&array.items),
            PayloadSchema::AllOf(c) | PayloadSchema::AnyOf(c) | PayloadSchema::OneOf(c) => {
                for item in &c.items {
                    self.collect_into(item);
                }
            }
            PayloadSchema::Basic(_)
            | PayloadSchema::Const(_)
            | PayloadSchema::Enum(_)
            | PayloadSchema::Ref(_) => {}
        }
    }

    /// Add or replace an entry, returning the one it replaced.
    pub fn insert(&mut self, id: i32, object: &'a ObjectSchema) -> Option<&'a ObjectSchema> {
        self.objects.insert(id, object)
    }

    /// Restore a previous entry (or remove the id when there was none).
    pub(crate) fn restore(&mut self, id: i32, previous: Option<&'a ObjectSchema>) {
        match previous {
            Some(object) => {
                self.objects.insert(id, object);
            }
            None => {
                self.objects.remove(&id);
            }
        }
    }

    pub fn resolve(&self, id: i32) -> Option<&'a ObjectSchema> {
        self.objects.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
