//! Structural compatibility between a producer schema and a consumer schema.
//!
//! Matching is asymmetric: the producer publishes, the consumer subscribes,
//! and the question is whether every message the producer may emit is
//! acceptable to the consumer.
//!
//! - `BASIC`: same format.
//! - `CONST`: same literal.
//! - `ENUM`: producer values are a subset of consumer values.
//! - `OBJECT`: every consumer property exists in the producer with a
//!   compatible schema; extra producer properties are ignored.
//! - `ARRAY`: items compatible.
//! - `ALL_OF` / `ANY_OF` / `ONE_OF`: same combinator kind and a one-to-one
//!   pairing of producer items to consumer items exists in which every pair is
//!   compatible. Item order is irrelevant.
//! - `REF`: resolved through the side's reference table. Two references
//!   that resolve on neither side agree only on the same identifier.
//!
//! Recursive schemas terminate through a co-inductive assumption: while a pair
//! of object schemas is being compared, meeting the same pair again is taken
//! as compatible instead of recursing.

use std::collections::HashSet;

use tracing::trace;

use super::{ObjectSchema, PayloadSchema, References};

/// Whether `producer` messages are acceptable where `consumer` is expected.
///
/// Reference tables are collected from each root schema.
pub fn matches(producer: &PayloadSchema, consumer: &PayloadSchema) -> bool {
    SchemaMatcher::new(References::collect(producer), References::collect(consumer))
        .matches(producer, consumer)
}

/// Optional-schema variant: an absent schema only matches another absent one.
pub fn matches_optional(producer: Option<&PayloadSchema>, consumer: Option<&PayloadSchema>) -> bool {
    match (producer, consumer) {
        (None, None) => true,
        (Some(p), Some(c)) => matches(p, c),
        _ => false,
    }
}

/// Resolved view of a schema: references are replaced by their object.
#[derive(Clone, Copy)]
enum Shape<'a> {
    Object(&'a ObjectSchema),
    Value(&'a PayloadSchema),
}

/// Stateful matcher carrying reference tables and the in-progress pair set.
pub struct SchemaMatcher<'a> {
    producer_refs: References<'a>,
    consumer_refs: References<'a>,
    /// Object pairs currently under comparison, by node address.
    in_progress: HashSet<(usize, usize)>,
}

impl<'a> SchemaMatcher<'a> {
    /// Create a matcher with caller-supplied reference tables.
    pub fn new(producer_refs: References<'a>, consumer_refs: References<'a>) -> Self {
        Self {
            producer_refs,
            consumer_refs,
            in_progress: HashSet::new(),
        }
    }

    /// Check `producer` against `consumer`.
    pub fn matches(&mut self, producer: &'a PayloadSchema, consumer: &'a PayloadSchema) -> bool {
        if let (PayloadSchema::Ref(p), PayloadSchema::Ref(c)) = (producer, consumer) {
            if self.producer_refs.resolve(p.identifier).is_none()
                && self.consumer_refs.resolve(c.identifier).is_none()
            {
                return p.identifier == c.identifier;
            }
        }

        let producer = match Self::shape(&self.producer_refs, producer) {
            Some(shape) => shape,
            None => return false,
        };
        let consumer = match Self::shape(&self.consumer_refs, consumer) {
            Some(shape) => shape,
            None => return false,
        };

        match (producer, consumer) {
            (Shape::Object(p), Shape::Object(c)) => self.match_objects(p, c),
            (Shape::Value(p), Shape::Value(c)) => self.match_values(p, c),
            _ => false,
        }
    }

    fn shape(refs: &References<'a>, schema: &'a PayloadSchema) -> Option<Shape<'a>> {
        match schema {
            PayloadSchema::Ref(reference) => match refs.resolve(reference.identifier) {
                Some(object) => Some(Shape::Object(object)),
                None => {
                    trace!(identifier = reference.identifier, "unresolved schema reference");
                    None
                }
            },
            PayloadSchema::Object(object) => Some(Shape::Object(object)),
            other => Some(Shape::Value(other)),
        }
    }

    fn match_objects(&mut self, producer: &'a ObjectSchema, consumer: &'a ObjectSchema) -> bool {
        let key = (
            producer as *const ObjectSchema as usize,
            consumer as *const ObjectSchema as usize,
        );
        if !self.in_progress.insert(key) {
            return true;
        }

        // An identified object shadows any outer declaration while inside it.
        let shadowed_producer = producer
            .id
            .map(|id| (id, self.producer_refs.insert(id, producer)));
        let shadowed_consumer = consumer
            .id
            .map(|id| (id, self.consumer_refs.insert(id, consumer)));

        let mut compatible = true;
        for (name, expected) in &consumer.properties {
            let provided = match producer.properties.get(name) {
                Some(provided) => provided,
                None => {
                    compatible = false;
                    break;
                }
            };
            if !self.matches(provided, expected) {
                compatible = false;
                break;
            }
        }

        if let Some((id, previous)) = shadowed_producer {
            self.producer_refs.restore(id, previous);
        }
        if let Some((id, previous)) = shadowed_consumer {
            self.consumer_refs.restore(id, previous);
        }
        self.in_progress.remove(&key);

        compatible
    }

    fn match_values(&mut self, producer: &'a PayloadSchema, consumer: &'a PayloadSchema) -> bool {
        use PayloadSchema::*;

        match (producer, consumer) {
            (Basic(p), Basic(c)) => p.format == c.format,
            (Const(p), Const(c)) => p.value == c.value,
            (Enum(p), Enum(c)) => p.values.is_subset(&c.values),
            (Array(p), Array(c)) => self.matches(&p.items, &c.items),
            (AllOf(p), AllOf(c)) | (AnyOf(p), AnyOf(c)) | (OneOf(p), OneOf(c)) => {
                self.match_items(&p.items, &c.items)
            }
            _ => false,
        }
    }

    /// Multiset comparison: a perfect pairing of compatible items must exist.
    fn match_items(&mut self, producer: &'a [PayloadSchema], consumer: &'a [PayloadSchema]) -> bool {
        if producer.len() != consumer.len() {
            return false;
        }

        let mut compatible = vec![vec![false; consumer.len()]; producer.len()];
        for (i, p) in producer.iter().enumerate() {
            for (j, c) in consumer.iter().enumerate() {
                compatible[i][j] = self.matches(p, c);
            }
        }

        has_perfect_pairing(&compatible)
    }
}

/// Bipartite perfect matching over a square compatibility matrix (Kuhn).
fn has_perfect_pairing(compatible: &[Vec<bool>]) -> bool {
    let size = compatible.len();
    let mut owner: Vec<Option<usize>> = vec![None; size];

    for producer in 0..size {
        let mut visited = vec![false; size];
        if !augment(producer, compatible, &mut visited, &mut owner) {
            return false;
        }
    }
    true
}

fn augment(
    producer: usize,
    compatible: &[Vec<bool>],
    visited: &mut [bool],
    owner: &mut [Option<usize>],
) -> bool {
    for consumer in 0..owner.len() {
        if !compatible[producer][consumer] || visited[consumer] {
            continue;
        }
        visited[consumer] = true;

        let free = match owner[consumer] {
            None => true,
            Some(current) => augment(current, compatible, visited, owner),
        };
        if free {
            owner[consumer] = Some(producer);
            return true;
        }
    }
    false
}
