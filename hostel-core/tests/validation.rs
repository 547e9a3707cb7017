use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hostel_core::validate::{FieldRule, Schema, Validator};
use regex::Regex;
use serde_json::json;

// ── Constraint evaluation counts ────────────────────────────────────────

#[test]
fn each_constraint_evaluated_exactly_once_per_call() {
    static EVALUATIONS: AtomicUsize = AtomicUsize::new(0);

    let chapter = Schema::new().rule(FieldRule::new("title").check("counted", |_| {
        EVALUATIONS.fetch_add(1, Ordering::SeqCst);
        true
    }));
    let schema = Schema::new().rule(FieldRule::new("chapters").each(chapter));

    let value = json!({ "chapters": [
        { "title": "one" }, { "title": "two" }, { "title": "three" }
    ]});
    let errors = Validator::new().validate("book", &value, &schema, &[]);
    assert!(errors.is_empty());
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 3);
}

// ── Deep cascading paths ────────────────────────────────────────────────

#[test]
fn map_value_cascade_produces_bracketed_paths() {
    let company = Schema::new().rule(FieldRule::new("company").not_null());
    let by_chapter = Schema::new().rule(FieldRule::new("authorsByChapter").each(company));

    let value = json!({
        "authorsByChapter": {
            "3": { "company": null }
        }
    });
    let errors = Validator::new().validate("book", &value, &by_chapter, &[]);
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors.iter().next().unwrap().path,
        "book.authorsByChapter[3].company"
    );
}

// ── Locale-aware interpolation ──────────────────────────────────────────

#[test]
fn messages_resolve_through_the_locale_chain() {
    let mut bundles = hostel_core::validate::MessageBundles::builtin();
    bundles.insert("pt", "validation.notnull", "não pode ser nulo");
    let validator = Validator::with_bundles(bundles);

    let schema = Schema::new().rule(FieldRule::new("x").not_null());
    let locales = vec!["pt-br".to_string(), "en".to_string()];
    let errors = validator.validate("v", &json!({ "x": null }), &schema, &locales);
    assert_eq!(errors.iter().next().unwrap().message, "não pode ser nulo");
}

// ── Group ordering ──────────────────────────────────────────────────────

#[test]
fn groups_evaluate_in_requested_order() {
    let order: Arc<std::sync::Mutex<Vec<&'static str>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));

    let first = order.clone();
    let second = order.clone();
    let schema = Schema::new()
        .rule(
            FieldRule::new("a")
                .check("first", move |_| {
                    first.lock().unwrap().push("create");
                    true
                })
                .groups(&["create"]),
        )
        .rule(
            FieldRule::new("a")
                .check("second", move |_| {
                    second.lock().unwrap().push("update");
                    true
                })
                .groups(&["update"]),
        );

    Validator::new().validate_groups(
        "v",
        &json!({ "a": 1 }),
        &schema,
        &[],
        &["update", "create"],
    );
    assert_eq!(*order.lock().unwrap(), vec!["update", "create"]);
}

// ── Mixed constraints over one object ───────────────────────────────────

#[test]
fn report_collects_all_violations_in_order() {
    let schema = Schema::new()
        .rule(FieldRule::new("name").not_null().size(Some(2), Some(10)))
        .rule(FieldRule::new("age").range(Some(0), Some(150)))
        .rule(FieldRule::new("code").pattern(Regex::new("^[A-Z]+$").unwrap()));

    let value = json!({ "name": "x", "age": 200, "code": "abc" });
    let errors = Validator::new().validate("person", &value, &schema, &[]);
    let paths: Vec<&str> = errors.iter().map(|v| v.path.as_str()).collect();
    assert_eq!(paths, vec!["person.name", "person.age", "person.code"]);

    let messages: Vec<&str> = errors.iter().map(|v| v.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "size must be between 2 and 10",
            "must be between 0 and 150",
            "must match \"^[A-Z]+$\""
        ]
    );
}

// ── Success means an empty set, never an error ──────────────────────────

#[test]
fn valid_values_produce_an_empty_set() {
    let schema = Schema::new()
        .rule(FieldRule::new("name").not_null().size(Some(1), Some(80)))
        .rule(FieldRule::new("age").range(Some(0), Some(150)));
    let errors = Validator::new().validate(
        "person",
        &json!({ "name": "Ada", "age": 36 }),
        &schema,
        &[],
    );
    assert!(errors.is_empty());
    assert_eq!(errors.len(), 0);
}
