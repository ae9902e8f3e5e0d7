//! Integration tests for finders, magic finder calls and find filters
//!
//! Posts are seeded through the memory connection's `fixtures` option.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tidemark::filters::filter_fn;
use tidemark::{
    options, ConnectionConfig, Connections, Field, Filter, Method, ModelDef, Options, Outcome, Registry,
};

fn fixtures() -> JsonValue {
    json!({
        "post": [
            {"id": 1, "title": "First", "author_id": 1, "views": 5},
            {"id": 2, "title": "Second", "author_id": 1, "views": 40},
            {"id": 3, "title": "Third", "author_id": 2, "views": 12},
            {"id": 4, "title": "Fourth", "author_id": 3, "views": 0}
        ]
    })
}

fn post_def() -> ModelDef {
    ModelDef::new("Post")
        .field("id", Field::new("integer"))
        .field("title", Field::new("string"))
        .field("author_id", Field::new("integer"))
        .field("views", Field::new("integer"))
}

fn setup_registry(def: ModelDef) -> Registry {
    let connections = Connections::new();
    connections.add("default", ConnectionConfig::new("memory").option("fixtures", fixtures()));
    let registry = Registry::new(connections);
    registry.define(def).expect("Failed to define Post");
    registry
}

fn ids(outcome: Outcome) -> Vec<JsonValue> {
    outcome
        .into_set()
        .expect("a set")
        .entities()
        .map(|e| e.get_json("id").cloned().unwrap_or_default())
        .collect()
}

#[test]
fn test_find_by_key() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");

    let post = posts.find(2, Options::new()).expect("find").into_entity().expect("entity");
    assert_eq!(post.get_json("title"), Some(&json!("Second")));
    assert!(post.exists());

    // A name that is not a finder is a key value.
    let post = posts.find("3", Options::new()).expect("find").into_entity().expect("entity");
    assert_eq!(post.get_json("title"), Some(&json!("Third")));

    assert_eq!(posts.find(99, Options::new()), Ok(Outcome::None));
}

#[test]
fn test_magic_find_by_matches_first_with_conditions() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");

    let magic = posts
        .call("findByTitle", json!("Second"), Options::new())
        .expect("magic finder");
    let explicit = posts
        .find("first", options(json!({"conditions": {"title": "Second"}})))
        .expect("first finder");
    assert_eq!(magic, explicit);
    assert!(matches!(magic, Outcome::Entity(_)));
}

#[test]
fn test_magic_find_all_by() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");
    let found = posts
        .call("findAllByAuthorId", json!(1), options(json!({"order": "id"})))
        .expect("magic finder");
    assert_eq!(ids(found), vec![json!(1), json!(2)]);
}

#[test]
fn test_first_on_empty_result_is_none() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");
    let missing = posts
        .first(options(json!({"conditions": {"title": "Nope"}})))
        .expect("find");
    assert!(missing.is_none());
    assert_eq!(
        posts.find("first", options(json!({"conditions": {"title": "Nope"}}))),
        Ok(Outcome::None)
    );
}

#[test]
fn test_count_moves_loose_options_into_conditions() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");
    assert_eq!(
        posts.find("count", options(json!({"author_id": 1}))).map(|o| o.count()),
        Ok(Some(2))
    );
    assert_eq!(posts.count(options(json!({"views": {">=": 12}}))), Ok(2));
    assert_eq!(posts.count(Options::new()), Ok(4));
}

#[test]
fn test_list_pairs_key_and_title() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");
    let list = posts
        .list(options(json!({"order": "id", "limit": 2})))
        .expect("list finder");
    assert_eq!(
        list,
        vec![(json!(1), json!("First")), (json!(2), json!("Second"))]
    );
}

#[test]
fn test_order_limit_and_page() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");
    let page = posts
        .find("all", options(json!({"order": "views DESC", "limit": 2, "page": 2})))
        .expect("find");
    assert_eq!(ids(page), vec![json!(1), json!(4)]);

    let projected = posts
        .all(options(json!({"fields": ["id"], "order": {"id": "desc"}, "limit": 1})))
        .expect("find");
    let entity = projected.entities().next().expect("one record");
    assert_eq!(entity.get_json("id"), Some(&json!(4)));
    assert!(!entity.has("title"));
}

#[test]
fn test_page_past_the_end_reads_nothing() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");

    let beyond = posts
        .all(options(json!({"order": "id", "limit": 2, "page": 3})))
        .expect("find");
    assert!(beyond.is_empty());

    let huge = posts
        .all(options(json!({"limit": 10, "page": u64::MAX})))
        .expect("huge page is not an error");
    assert!(huge.is_empty());
    assert_eq!(
        posts.first(options(json!({"page": u64::MAX}))).map(|e| e.is_some()),
        Ok(false)
    );
    assert_eq!(
        posts
            .find("count", options(json!({"limit": 10, "page": u64::MAX})))
            .map(|o| o.count()),
        Ok(Some(4))
    );

    // `page: 0` is the first page.
    let first_page = posts
        .find("all", options(json!({"order": "id", "limit": 2, "page": 0})))
        .expect("find");
    assert_eq!(ids(first_page), vec![json!(1), json!(2)]);
}

#[test]
fn test_declared_options_finder() {
    let registry = setup_registry(
        post_def()
            .finder("popular", options(json!({"conditions": {"views": {">": 10}}, "order": "views DESC"}))),
    );
    let posts = registry.model("Post").expect("Failed to get model");

    assert_eq!(ids(posts.find("popular", Options::new()).expect("find")), vec![json!(2), json!(3)]);

    // Caller options merge over the finder's.
    let own = posts
        .find("popular", options(json!({"conditions": {"author_id": 2}})))
        .expect("find");
    assert_eq!(ids(own), vec![json!(3)]);

    let magic = posts
        .call("findPopularByAuthorId", json!(1), Options::new())
        .expect("magic finder");
    assert_eq!(ids(magic), vec![json!(2)]);
}

#[test]
fn test_default_query_options() {
    let registry = setup_registry(post_def().query(options(json!({"order": "title"}))));
    let posts = registry.model("Post").expect("Failed to get model");
    let titles: Vec<JsonValue> = posts
        .all(Options::new())
        .expect("find")
        .entities()
        .map(|e| e.get_json("title").cloned().unwrap_or_default())
        .collect();
    assert_eq!(titles, vec![json!("First"), json!("Fourth"), json!("Second"), json!("Third")]);
}

#[test]
fn test_find_filter_rewrites_options() {
    let registry = setup_registry(post_def());
    registry.filters().apply_fn("Post", Method::Find, |params, chain| {
        if let Some(options) = params.options_mut() {
            let mut scope = Options::new();
            scope.insert("author_id".into(), json!(2));
            options.insert("conditions".into(), JsonValue::Object(scope));
        }
        chain.next(params)
    });
    let posts = registry.model("Post").expect("Failed to get model");
    assert_eq!(ids(posts.find("all", Options::new()).expect("find")), vec![json!(3)]);
    assert_eq!(posts.count(Options::new()), Ok(1));

    // Filters belong to the registry's models only.
    registry.filters().clear(Some("Post"));
    assert_eq!(posts.count(Options::new()), Ok(4));
}

#[test]
fn test_runtime_finder_filter() {
    let registry = setup_registry(post_def());
    let posts = registry.model("Post").expect("Failed to get model");
    let total_views: Arc<dyn Filter> = Arc::new(filter_fn(|params, chain| {
        let set = chain.next(params)?.into_set().unwrap_or_default();
        let total = set
            .entities()
            .filter_map(|e| e.get_json("views").and_then(JsonValue::as_i64))
            .sum::<i64>();
        Ok(Outcome::Scalar(json!(total)))
    }));
    posts.set_finder("totalViews", total_views).expect("set finder");

    assert_eq!(posts.find("totalViews", Options::new()), Ok(Outcome::Scalar(json!(57))));
    assert_eq!(
        posts.call("findTotalViewsByAuthorId", json!(1), Options::new()),
        Ok(Outcome::Scalar(json!(45)))
    );
    assert!(posts.finder_names().expect("names").contains(&"totalViews".to_string()));
}
