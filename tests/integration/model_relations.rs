//! Integration tests for relations, eager loading and definition inheritance
//!
//! Test relationships:
//! - Author has_many Posts (one-to-many)
//! - Post belongs_to Author (many-to-one)
//! - Order embeds its Lines (contained)

use serde_json::{json, Value as JsonValue};
use tidemark::{
    options, ConnectionConfig, Connections, CreateOptions, ExportOptions, Field, ModelDef, Options,
    RelationConfig, Registry, Value,
};

fn setup_registry() -> Registry {
    let connections = Connections::new();
    connections.add(
        "default",
        ConnectionConfig::new("memory").option(
            "fixtures",
            json!({
                "author": [
                    {"id": 1, "name": "Ada"},
                    {"id": 2, "name": "Grace"},
                    {"id": 3, "name": "Linus"}
                ],
                "post": [
                    {"id": 1, "title": "Engines", "author_id": 1},
                    {"id": 2, "title": "Notes", "author_id": 1},
                    {"id": 3, "title": "Compilers", "author_id": 2},
                    {"id": 4, "title": "Orphan"}
                ]
            }),
        ),
    );
    let registry = Registry::new(connections);
    registry
        .define(
            ModelDef::new("Author")
                .field("id", Field::new("integer"))
                .field("name", Field::new("string"))
                .has_many("Posts", RelationConfig::to("Post").order("id")),
        )
        .expect("Failed to define Author");
    registry
        .define(
            ModelDef::new("Post")
                .field("id", Field::new("integer"))
                .field("title", Field::new("string"))
                .field("author_id", Field::new("integer"))
                .belongs_to("Author", RelationConfig::to("Author")),
        )
        .expect("Failed to define Post");
    registry
}

fn post_count(value: Option<&Value>) -> usize {
    value.and_then(Value::as_set).map_or(0, |set| set.len())
}

#[test]
fn test_has_many_eager_loading() {
    let registry = setup_registry();
    let authors = registry.model("Author").expect("Failed to get model");
    let set = authors
        .all(options(json!({"with": ["Posts"], "order": "id"})))
        .expect("find");

    let counts: Vec<usize> = set.entities().map(|a| post_count(a.relation("posts"))).collect();
    assert_eq!(counts, vec![2, 1, 0]);

    let ada = set.entities().next().expect("first author");
    let titles: Vec<JsonValue> = ada
        .relation("posts")
        .and_then(Value::as_set)
        .map(|posts| {
            posts
                .entities()
                .map(|p| p.get_json("title").cloned().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(titles, vec![json!("Engines"), json!("Notes")]);
}

#[test]
fn test_belongs_to_eager_loading() {
    let registry = setup_registry();
    let posts = registry.model("Post").expect("Failed to get model");

    let post = posts
        .first(options(json!({"conditions": {"id": 3}, "with": "Author"})))
        .expect("find")
        .expect("post");
    let author = post.relation("author").and_then(Value::as_entity).expect("author loaded");
    assert_eq!(author.get_json("name"), Some(&json!("Grace")));
    assert!(author.exists());

    // Relations are reachable through `get` and exported with the entity.
    assert!(post.get("author").is_some());
    let exported = post.to_array(&ExportOptions::new());
    assert_eq!(exported["author"]["name"], json!("Grace"));
}

#[test]
fn test_missing_foreign_key_loads_nothing() {
    let registry = setup_registry();
    let posts = registry.model("Post").expect("Failed to get model");
    let orphan = posts.find(4, Options::new()).expect("find").into_entity().expect("post");
    let author = posts.related(&orphan, "Author").expect("related");
    assert!(author.is_null());
}

#[test]
fn test_lazy_related_lookup() {
    let registry = setup_registry();
    let authors = registry.model("Author").expect("Failed to get model");
    let grace = authors.find(2, Options::new()).expect("find").into_entity().expect("author");

    assert_eq!(authors.relation_names(), Ok(vec!["Posts".to_string()]));
    let relationship = authors.relations("Posts").expect("relations").expect("declared");
    assert_eq!(relationship.keys.get("id").map(String::as_str), Some("author_id"));

    let posts = authors.related(&grace, "Posts").expect("related");
    assert_eq!(post_count(Some(&posts)), 1);
    assert!(authors.related(&grace, "Comments").is_err());
}

#[test]
fn test_contained_relation_reads_embedded_field() {
    let registry = setup_registry();
    registry
        .define(
            ModelDef::new("Order")
                .connection(None)
                .has_many("Lines", RelationConfig::to("Line").contained()),
        )
        .expect("Failed to define Order");
    let orders = registry.model("Order").expect("Failed to get model");
    let order = orders
        .create(
            options(json!({"lines": [{"sku": "A", "qty": 2}, {"sku": "B", "qty": 1}]})),
            CreateOptions::default(),
        )
        .expect("create");

    let lines = orders.related(&order, "Lines").expect("related");
    let lines = lines.as_set().expect("embedded set");
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines.entities().next().and_then(|l| l.get_json("sku")),
        Some(&json!("A"))
    );
}

#[test]
fn test_inherited_definition() {
    let registry = setup_registry();
    let base = ModelDef::new("Base")
        .field("id", Field::new("integer"))
        .field("title", Field::new("string"))
        .query(options(json!({"order": "id"})))
        .finder("withAuthors", options(json!({"with": ["Author"]})))
        .belongs_to("Author", RelationConfig::to("Author"));
    registry
        .define(
            ModelDef::new("Article")
                .source("post")
                .field("author_id", Field::new("integer"))
                .inherit(&base),
        )
        .expect("Failed to define Article");
    let articles = registry.model("Article").expect("Failed to get model");

    assert_eq!(articles.meta().source, "post");
    assert_eq!(articles.relation_names(), Ok(vec!["Author".to_string()]));

    let set = articles.find("withAuthors", Options::new()).expect("find").into_set().expect("set");
    let first = set.entities().next().expect("article");
    assert_eq!(first.model(), Some("Article"));
    assert_eq!(
        first.relation("author").and_then(Value::as_entity).and_then(|a| a.get_json("name")),
        Some(&json!("Ada"))
    );
}
