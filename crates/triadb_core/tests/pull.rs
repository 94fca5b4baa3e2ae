//! Pull operator scenarios: wildcard, joins, reverse navigation,
//! recursion and the dangling/missing-identifier contract.

use triadb_core::{
    attr, join, recur, wildcard, Attr, EntityId, Ident, MapForm, Pattern, TxForm, Value,
};
use triadb_testkit::prelude::*;

fn get<'a>(result: &'a Value, key: &str) -> Option<&'a Value> {
    result.as_map().unwrap().get(&Attr::from(key))
}

#[test]
fn wildcard_on_component_pulls_the_full_owned_entity() {
    let db = db_s0();
    let license = Value::map([
        (Attr::from("db/id"), Value::from("l")),
        (Attr::from("license-number"), Value::from("L1")),
    ]);
    let report = db
        .transact(vec![TxForm::Map(
            MapForm::new()
                .with_id(Ident::temp("p"))
                .pair("name", "P")
                .pair("license", license),
        )])
        .unwrap();
    let p = report.resolved("p").unwrap().clone();
    let l = report.resolved("l").unwrap().clone();

    let pulled = report
        .db_after
        .pull(&Pattern::everything(), &Ident::Entity(p.clone()))
        .unwrap();

    assert_eq!(get(&pulled, "db/id"), Some(&Value::Ref(p)));
    assert_eq!(get(&pulled, "name"), Some(&Value::from("P")));
    // The component expands to the full license entity map.
    let license = get(&pulled, "license").unwrap();
    assert_eq!(
        license.as_map().unwrap().get(&Attr::from("license-number")),
        Some(&Value::from("L1"))
    );
    assert_eq!(
        license.as_map().unwrap().get(&Attr::from("db/id")),
        Some(&Value::Ref(l))
    );
}

#[test]
fn cycle_safe_recursive_pull_terminates_with_identifier_leaf() {
    let (db, [a, _, _]) = friend_cycle();
    let pattern = Pattern::new(vec![attr("name"), recur("best-friend", 3)]);
    let pulled = db.pull(&pattern, &Ident::Entity(a.clone())).unwrap();

    assert_eq!(get(&pulled, "name"), Some(&Value::from("A")));
    let level1 = get(&pulled, "best-friend").unwrap();
    assert_eq!(
        level1.as_map().unwrap().get(&Attr::from("name")),
        Some(&Value::from("B"))
    );
    let level2 = level1.as_map().unwrap().get(&Attr::from("best-friend")).unwrap();
    assert_eq!(
        level2.as_map().unwrap().get(&Attr::from("name")),
        Some(&Value::from("C"))
    );
    let level3 = level2.as_map().unwrap().get(&Attr::from("best-friend")).unwrap();
    // The cycle closes back on A: identifier-only map, nothing deeper.
    assert_eq!(
        level3,
        &Value::map([(Attr::from("db/id"), Value::Ref(a))])
    );
}

#[test]
fn plain_reference_attributes_wrap_identifiers() {
    let (db, [a, b, _]) = friend_cycle();
    let pulled = db
        .pull(&Pattern::of(["best-friend"]), &Ident::Entity(a))
        .unwrap();
    assert_eq!(
        get(&pulled, "best-friend"),
        Some(&Value::map([(Attr::from("db/id"), Value::Ref(b))]))
    );
}

#[test]
fn join_pulls_nested_attributes() {
    let (db, [a, _, _]) = friend_cycle();
    let pattern = Pattern::new(vec![
        attr("name"),
        join("best-friend", Pattern::of(["name"])),
    ]);
    let pulled = db.pull(&pattern, &Ident::Entity(a)).unwrap();
    let bf = get(&pulled, "best-friend").unwrap();
    assert_eq!(
        bf.as_map().unwrap().get(&Attr::from("name")),
        Some(&Value::from("B"))
    );
}

#[test]
fn reverse_navigation_over_entity_set_shape_sorts_sources() {
    let db = db_s0();
    let report = db
        .transact(vec![
            TxForm::assert(Ident::temp("x"), "name", "X"),
            TxForm::assert(Ident::temp("p"), "friend", Value::tempid("x")),
            TxForm::assert(Ident::temp("q"), "friend", Value::tempid("x")),
            TxForm::assert(Ident::temp("p"), "name", "P"),
            TxForm::assert(Ident::temp("q"), "name", "Q"),
        ])
        .unwrap();
    let x = report.resolved("x").unwrap().clone();
    let mut expected: Vec<EntityId> = ["p", "q"]
        .iter()
        .map(|l| report.resolved(l).unwrap().clone())
        .collect();
    expected.sort();

    let pulled = report
        .db_after
        .pull(&Pattern::of(["_friend"]), &Ident::Entity(x))
        .unwrap();
    let sources = get(&pulled, "_friend").unwrap().as_list().unwrap();
    let ids: Vec<EntityId> = sources
        .iter()
        .map(|m| {
            m.as_map()
                .unwrap()
                .get(&Attr::from("db/id"))
                .unwrap()
                .as_ref_id()
                .unwrap()
                .clone()
        })
        .collect();
    assert_eq!(ids, expected);
}

#[test]
fn reverse_navigation_over_single_shape_yields_one_map() {
    let db = db_s0();
    let report = db
        .transact(vec![
            TxForm::assert(Ident::temp("p"), "name", "P"),
            TxForm::assert(Ident::temp("p"), "license", Value::tempid("l")),
            TxForm::assert(Ident::temp("l"), "license-number", "L1"),
        ])
        .unwrap();
    let p = report.resolved("p").unwrap().clone();
    let l = report.resolved("l").unwrap().clone();

    // license is a component: its AVE entry is single-entity shaped, so
    // the reverse result is one map rather than a sequence.
    let pulled = report
        .db_after
        .pull(&Pattern::of(["_license"]), &Ident::Entity(l))
        .unwrap();
    assert_eq!(
        get(&pulled, "_license"),
        Some(&Value::map([(Attr::from("db/id"), Value::Ref(p))]))
    );
}

#[test]
fn reverse_join_applies_the_sub_pattern() {
    let db = db_s0();
    let report = db
        .transact(vec![
            TxForm::assert(Ident::temp("x"), "name", "X"),
            TxForm::assert(Ident::temp("p"), "friend", Value::tempid("x")),
            TxForm::assert(Ident::temp("p"), "name", "P"),
        ])
        .unwrap();
    let x = report.resolved("x").unwrap().clone();
    let pattern = Pattern::new(vec![join("_friend", Pattern::of(["name"]))]);
    let pulled = report.db_after.pull(&pattern, &Ident::Entity(x)).unwrap();
    let sources = get(&pulled, "_friend").unwrap().as_list().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(
        sources[0].as_map().unwrap().get(&Attr::from("name")),
        Some(&Value::from("P"))
    );
}

#[test]
fn missing_identifier_policy() {
    let db = db_s0();
    let ghost = Ident::id(404);
    // Wildcard (or db/id) keeps the identifier-only map form.
    let with_wildcard = db.pull(&Pattern::everything(), &ghost).unwrap();
    assert_eq!(
        with_wildcard,
        Value::map([(Attr::from("db/id"), Value::Ref(EntityId::Id(404)))])
    );
    let with_db_id = db.pull(&Pattern::of(["db/id"]), &ghost).unwrap();
    assert_eq!(
        with_db_id,
        Value::map([(Attr::from("db/id"), Value::Ref(EntityId::Id(404)))])
    );
    // Anything else yields the empty map.
    let without = db.pull(&Pattern::of(["name"]), &ghost).unwrap();
    assert_eq!(without, Value::map([]));
}

#[test]
fn dangling_reference_is_preserved_as_identifier_map() {
    let db = db_s0();
    let report = db
        .transact(vec![TxForm::assert(
            Ident::temp("a"),
            "best-friend",
            Value::from(99i64),
        )])
        .unwrap();
    let a = report.resolved("a").unwrap().clone();

    let plain = report
        .db_after
        .pull(&Pattern::of(["best-friend"]), &Ident::Entity(a.clone()))
        .unwrap();
    assert_eq!(
        get(&plain, "best-friend"),
        Some(&Value::map([(Attr::from("db/id"), Value::Ref(EntityId::Id(99)))]))
    );

    // A join whose sub-pattern keeps nothing elides the dangling target.
    let joined = report
        .db_after
        .pull(
            &Pattern::new(vec![join("best-friend", Pattern::of(["name"]))]),
            &Ident::Entity(a),
        )
        .unwrap();
    assert!(get(&joined, "best-friend").is_none());
}

#[test]
fn wildcard_does_not_overwrite_join_results() {
    let (db, [a, _, _]) = friend_cycle();
    let pattern = Pattern::new(vec![
        join("best-friend", Pattern::of(["name"])),
        wildcard(),
    ]);
    let pulled = db.pull(&pattern, &Ident::Entity(a.clone())).unwrap();
    // The join result survives; the wildcard fills the rest.
    assert_eq!(
        get(&pulled, "best-friend")
            .unwrap()
            .as_map()
            .unwrap()
            .get(&Attr::from("name")),
        Some(&Value::from("B"))
    );
    assert_eq!(get(&pulled, "name"), Some(&Value::from("A")));
    assert_eq!(get(&pulled, "db/id"), Some(&Value::Ref(a)));
}

#[test]
fn wildcard_order_does_not_matter_for_joins() {
    let (db, [a, _, _]) = friend_cycle();
    let before = Pattern::new(vec![
        wildcard(),
        join("best-friend", Pattern::of(["name"])),
    ]);
    let after = Pattern::new(vec![
        join("best-friend", Pattern::of(["name"])),
        wildcard(),
    ]);
    assert_eq!(
        db.pull(&before, &Ident::Entity(a.clone())).unwrap(),
        db.pull(&after, &Ident::Entity(a)).unwrap()
    );
}

#[test]
fn cardinality_many_reference_renders_a_sequence() {
    let db = db_s0();
    let report = db
        .transact(vec![
            TxForm::assert(Ident::temp("a"), "name", "A"),
            TxForm::assert(Ident::temp("b"), "name", "B"),
            TxForm::assert(Ident::temp("c"), "name", "C"),
            TxForm::assert(Ident::temp("a"), "friend", Value::tempid("b")),
            TxForm::assert(Ident::temp("a"), "friend", Value::tempid("c")),
        ])
        .unwrap();
    let a = report.resolved("a").unwrap().clone();

    let pulled = report
        .db_after
        .pull(
            &Pattern::new(vec![join("friend", Pattern::of(["name"]))]),
            &Ident::Entity(a),
        )
        .unwrap();
    let friends = get(&pulled, "friend").unwrap().as_list().unwrap();
    let mut names: Vec<&str> = friends
        .iter()
        .map(|m| {
            m.as_map()
                .unwrap()
                .get(&Attr::from("name"))
                .unwrap()
                .as_text()
                .unwrap()
        })
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["B", "C"]);
}

#[test]
fn pull_is_idempotent() {
    let (db, [a, _, _]) = friend_cycle();
    let pattern = Pattern::new(vec![attr("name"), recur("best-friend", 5), wildcard()]);
    let once = db.pull(&pattern, &Ident::Entity(a.clone())).unwrap();
    let twice = db.pull(&pattern, &Ident::Entity(a)).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn pull_many_preserves_input_order() {
    let (db, [a, b, c]) = friend_cycle();
    let idents = vec![
        Ident::Entity(c.clone()),
        Ident::Entity(a.clone()),
        Ident::Entity(b.clone()),
    ];
    let results = db.pull_many(&Pattern::of(["name"]), &idents).unwrap();
    let names: Vec<&str> = results
        .iter()
        .map(|r| get(r, "name").unwrap().as_text().unwrap())
        .collect();
    assert_eq!(names, vec!["C", "A", "B"]);
}

#[test]
fn pull_with_lookup_ref_start() {
    let (db, _) = seeded_person("A", "a@x");
    let pulled = db
        .pull(&Pattern::of(["name"]), &Ident::lookup("email", "a@x"))
        .unwrap();
    assert_eq!(get(&pulled, "name"), Some(&Value::from("A")));

    // An unresolved lookup ref reads as the empty map.
    let missing = db
        .pull(&Pattern::everything(), &Ident::lookup("email", "zz@x"))
        .unwrap();
    assert_eq!(missing, Value::map([]));
}

#[test]
fn recursion_depth_exhaustion_yields_identifier_leaf() {
    let (db, [a, _, c]) = friend_cycle();
    let pattern = Pattern::new(vec![recur("best-friend", 1)]);
    let pulled = db.pull(&pattern, &Ident::Entity(a)).unwrap();
    // One descent into B; B's own best-friend link is cut to the
    // identifier-only form by the exhausted budget.
    let level1 = get(&pulled, "best-friend").unwrap();
    let leaf = level1.as_map().unwrap().get(&Attr::from("best-friend")).unwrap();
    assert_eq!(leaf, &Value::map([(Attr::from("db/id"), Value::Ref(c))]));
}

#[test]
fn reverse_recursion_walks_incoming_edges() {
    let (db, [a, b, _]) = friend_cycle();
    // best-friend edges: A→B→C→A, so following _best-friend from A finds
    // C, and from C finds B (as an identifier leaf at depth 0).
    let pattern = Pattern::new(vec![recur("_best-friend", 1)]);
    let pulled = db.pull(&pattern, &Ident::Entity(a)).unwrap();
    let level1 = get(&pulled, "_best-friend").unwrap().as_list().unwrap();
    let inner = level1[0]
        .as_map()
        .unwrap()
        .get(&Attr::from("_best-friend"))
        .unwrap()
        .as_list()
        .unwrap();
    assert_eq!(
        inner[0],
        Value::map([(Attr::from("db/id"), Value::Ref(b))])
    );
}
