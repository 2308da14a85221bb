//! Unit tests for the payload schema model and matcher.

use proptest::prelude::*;

use super::*;

fn string() -> PayloadSchema {
    PayloadSchema::basic(BasicFormat::String)
}

fn integer() -> PayloadSchema {
    PayloadSchema::basic(BasicFormat::Integer)
}

/// `Node{value: STRING, children: ARRAY<REF(Node)>}`
fn tree(id: i32) -> PayloadSchema {
    PayloadSchema::identified_object(
        id,
        [
            ("value", string()),
            ("children", PayloadSchema::array(PayloadSchema::reference(id))),
        ],
    )
}

fn combinator(kind: &str, items: Vec<PayloadSchema>) -> PayloadSchema {
    let items = CombinatorSchema { items };
    match kind {
        "all" => PayloadSchema::AllOf(items),
        "any" => PayloadSchema::AnyOf(items),
        _ => PayloadSchema::OneOf(items),
    }
}

// ============================================================================
// Scalars
// ============================================================================

#[test]
fn test_basic_same_format_matches() {
    assert!(matches(&string(), &string()));
    assert!(!matches(&string(), &integer()));
}

#[test]
fn test_constant_requires_equal_value() {
    assert!(matches(
        &PayloadSchema::constant("on"),
        &PayloadSchema::constant("on")
    ));
    assert!(!matches(
        &PayloadSchema::constant("on"),
        &PayloadSchema::constant("off")
    ));
}

#[test]
fn test_enum_producer_must_be_subset() {
    let narrow = PayloadSchema::enumeration(["A", "B"]);
    let wide = PayloadSchema::enumeration(["A", "B", "C"]);

    assert!(matches(&narrow, &wide));
    assert!(!matches(&wide, &narrow));
}

#[test]
fn test_mismatched_kinds_never_match() {
    let object = PayloadSchema::object([("x", string())]);
    assert!(!matches(&string(), &object));
    assert!(!matches(&object, &string()));
    assert!(!matches(&PayloadSchema::constant("1"), &integer()));
}

#[test]
fn test_absent_schema_only_matches_absent() {
    assert!(matches_optional(None, None));
    assert!(!matches_optional(Some(&string()), None));
    assert!(!matches_optional(None, Some(&string())));
    assert!(matches_optional(Some(&string()), Some(&string())));
}

// ============================================================================
// Objects and arrays
// ============================================================================

#[test]
fn test_object_ignores_producer_extras() {
    let producer = PayloadSchema::object([("x", string()), ("extra", integer())]);
    let consumer = PayloadSchema::object([("x", string())]);

    assert!(matches(&producer, &consumer));
    assert!(!matches(&consumer, &producer), "consumer requires 'extra'");
}

#[test]
fn test_object_property_schema_must_match() {
    let producer = PayloadSchema::object([("x", integer())]);
    let consumer = PayloadSchema::object([("x", string())]);
    assert!(!matches(&producer, &consumer));
}

#[test]
fn test_array_items_compared() {
    assert!(matches(
        &PayloadSchema::array(string()),
        &PayloadSchema::array(string())
    ));
    assert!(!matches(
        &PayloadSchema::array(string()),
        &PayloadSchema::array(integer())
    ));
}

// ============================================================================
// Combinators
// ============================================================================

#[test]
fn test_combinator_order_irrelevant() {
    let producer = combinator("one", vec![string(), integer()]);
    let consumer = combinator("one", vec![integer(), string()]);
    assert!(matches(&producer, &consumer));
}

#[test]
fn test_combinator_needs_one_to_one_pairing() {
    // Both producer items fit the first consumer item, but nothing fits the second.
    let wide = PayloadSchema::enumeration(["A", "B"]);
    let producer = combinator(
        "any",
        vec![
            PayloadSchema::enumeration(["A"]),
            PayloadSchema::enumeration(["B"]),
        ],
    );
    let consumer = combinator("any", vec![wide, PayloadSchema::enumeration(["C"])]);
    assert!(!matches(&producer, &consumer));
}

#[test]
fn test_combinator_pairing_found_after_reassignment() {
    // Greedy assignment of the first item to the wide slot would fail.
    let producer = combinator(
        "all",
        vec![
            PayloadSchema::enumeration(["A"]),
            PayloadSchema::enumeration(["B"]),
        ],
    );
    let consumer = combinator(
        "all",
        vec![
            PayloadSchema::enumeration(["A", "B"]),
            PayloadSchema::enumeration(["A"]),
        ],
    );
    assert!(matches(&producer, &consumer));
}

#[test]
fn test_combinator_kinds_are_exact() {
    let items = vec![string(), integer()];
    assert!(!matches(
        &combinator("all", items.clone()),
        &combinator("any", items.clone())
    ));
    assert!(!matches(
        &combinator("any", items.clone()),
        &combinator("one", items)
    ));
}

#[test]
fn test_combinator_size_must_agree() {
    assert!(!matches(
        &combinator("one", vec![string()]),
        &combinator("one", vec![string(), string()])
    ));
    assert!(matches(&combinator("one", vec![]), &combinator("one", vec![])));
}

// ============================================================================
// References and recursion
// ============================================================================

#[test]
fn test_recursive_schema_terminates_and_matches_itself() {
    assert!(matches(&tree(1), &tree(1)));
}

#[test]
fn test_recursive_schemas_with_different_ids_match() {
    assert!(matches(&tree(1), &tree(7)));
}

#[test]
fn test_recursive_schema_detects_mismatch_below_cycle() {
    let consumer = PayloadSchema::identified_object(
        3,
        [
            ("value", integer()),
            ("children", PayloadSchema::array(PayloadSchema::reference(3))),
        ],
    );
    assert!(!matches(&tree(1), &consumer));
}

#[test]
fn test_out_of_phase_cycles_terminate() {
    // Producer cycles every two levels, consumer every level, and the
    // identified objects never line up at the same depth.
    let producer = PayloadSchema::object([(
        "next",
        PayloadSchema::identified_object(
            1,
            [(
                "next",
                PayloadSchema::object([("next", PayloadSchema::reference(1))]),
            )],
        ),
    )]);
    let consumer =
        PayloadSchema::identified_object(2, [("next", PayloadSchema::reference(2))]);

    assert!(matches(&producer, &consumer));
}

#[test]
fn test_unresolved_references_match_by_identifier() {
    let dangling = PayloadSchema::object([("x", PayloadSchema::reference(42))]);
    assert!(matches(&dangling, &dangling.clone()));

    let other = PayloadSchema::object([("x", PayloadSchema::reference(7))]);
    assert!(!matches(&dangling, &other));
}

#[test]
fn test_unresolved_reference_never_matches_a_resolved_one() {
    let dangling = PayloadSchema::object([("x", PayloadSchema::reference(42))]);
    let resolved = PayloadSchema::object([("x", tree(42))]);
    assert!(!matches(&resolved, &dangling));
    assert!(!matches(&dangling, &resolved));
    assert!(!matches(&dangling, &PayloadSchema::object([("x", string())])));
}

#[test]
fn test_reference_resolves_against_supplied_table() {
    let shared = ObjectSchema {
        id: Some(5),
        properties: [("name".to_string(), string())].into_iter().collect(),
    };
    let producer = PayloadSchema::reference(5);
    let consumer = PayloadSchema::object([("name", string())]);

    let mut producer_refs = References::new();
    producer_refs.insert(5, &shared);

    let mut matcher = SchemaMatcher::new(producer_refs, References::collect(&consumer));
    assert!(matcher.matches(&producer, &consumer));
    assert!(!super::matches(&producer, &consumer), "no table, no resolution");
}

#[test]
fn test_references_collect_finds_nested_objects() {
    let schema = PayloadSchema::array(combinator("any", vec![tree(1), tree(2)]));
    let refs = References::collect(&schema);
    assert_eq!(refs.len(), 2);
    assert!(refs.resolve(1).is_some());
    assert!(refs.resolve(3).is_none());
}

// ============================================================================
// Wire form
// ============================================================================

#[test]
fn test_wire_form_uses_type_discriminator() {
    let json = serde_json::json!({
        "type": "OBJECT",
        "id": 1,
        "properties": {
            "value": {"type": "BASIC", "format": "STRING"},
            "children": {"type": "ARRAY", "items": {"type": "REF", "identifier": 1}},
            "mode": {"type": "ENUM", "values": ["A", "B"]},
            "either": {"type": "ONE_OF", "items": [{"type": "CONST", "value": "x"}]}
        }
    });

    let schema: PayloadSchema = serde_json::from_value(json).expect("valid schema");
    let PayloadSchema::Object(object) = &schema else {
        panic!("expected object, got {}", schema.kind());
    };
    assert_eq!(object.id, Some(1));
    assert_eq!(object.properties.len(), 4);
    assert!(matches(&schema, &schema));
}

// ============================================================================
// Properties
// ============================================================================

fn leaf() -> impl Strategy<Value = PayloadSchema> {
    prop_oneof![
        Just(string()),
        Just(integer()),
        Just(PayloadSchema::basic(BasicFormat::Boolean)),
        "[a-c]".prop_map(|value: String| PayloadSchema::constant(value)),
        prop::collection::btree_set("[a-d]", 1..3)
            .prop_map(|values| PayloadSchema::Enum(EnumSchema { values })),
    ]
}

fn schema() -> impl Strategy<Value = PayloadSchema> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(PayloadSchema::array),
            prop::collection::btree_map("[a-c]", inner.clone(), 0..3)
                .prop_map(|properties| PayloadSchema::Object(ObjectSchema { id: None, properties })),
            prop::collection::vec(inner.clone(), 0..4)
                .prop_map(|items| PayloadSchema::AnyOf(CombinatorSchema { items })),
            prop::collection::vec(inner, 0..4)
                .prop_map(|items| PayloadSchema::OneOf(CombinatorSchema { items })),
        ]
    })
}

proptest! {
    #[test]
    fn prop_match_is_reflexive(schema in schema()) {
        prop_assert!(matches(&schema, &schema.clone()));
    }

    #[test]
    fn prop_combinator_permutation_invariant(
        producer in prop::collection::vec(schema(), 0..4),
        consumer in prop::collection::vec(schema(), 0..4),
        seed in any::<u64>(),
    ) {
        let baseline = matches(
            &combinator("one", producer.clone()),
            &combinator("one", consumer.clone()),
        );

        let mut shuffled = consumer.clone();
        if !shuffled.is_empty() {
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
        }
        let mut reversed = producer.clone();
        reversed.reverse();

        prop_assert_eq!(
            baseline,
            matches(&combinator("one", producer.clone()), &combinator("one", shuffled.clone()))
        );
        prop_assert_eq!(
            baseline,
            matches(&combinator("one", reversed), &combinator("one", shuffled))
        );

        // Reverse direction is order-invariant too.
        let backwards = matches(
            &combinator("one", consumer.clone()),
            &combinator("one", producer.clone()),
        );
        let mut producer_reversed = producer;
        producer_reversed.reverse();
        prop_assert_eq!(
            backwards,
            matches(&combinator("one", consumer), &combinator("one", producer_reversed))
        );
    }
}
